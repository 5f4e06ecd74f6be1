use chrono::{DateTime, Local};

const FACILITY_USER: u8 = 1;
const SEVERITY_INFO: u8 = 6;

/// One syslog message, RFC 5424 layout with empty procid, msgid and
/// structured data. Framing (the trailing newline on stream transports)
/// is owned by the transport, not the packet.
pub struct Packet<'a> {
    pub hostname: &'a str,
    pub tag: &'a str,
    pub time: DateTime<Local>,
    pub message: &'a str,
}

impl Packet<'_> {
    pub fn generate(&self) -> String {
        let pri = (FACILITY_USER << 3) | SEVERITY_INFO;
        format!(
            "<{}>1 {} {} {} - - - {}",
            pri,
            self.time.format("%Y-%m-%dT%H:%M:%S%.6f%:z"),
            self.hostname,
            self.tag,
            self.message,
        )
    }
}

use serde_json::Value;

/// Fetches an expvar document from one HTTP endpoint.
pub struct Fetcher {
    url: String,
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Fetcher {
        Fetcher {
            url: url.into(),
            client,
        }
    }

    pub async fn fetch(&self) -> Result<Value, reqwest::Error> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Visits every numeric leaf of an expvar document with its dot-joined
/// path. Strings, booleans, nulls and arrays carry no point value and
/// are skipped, including anything nested inside arrays.
pub fn walk(vars: &Value, mut visit: impl FnMut(&str, f64)) {
    if let Value::Object(map) = vars {
        for (key, value) in map {
            walk_rec(key.clone(), value, &mut visit);
        }
    }
}

fn walk_rec(path: String, value: &Value, visit: &mut impl FnMut(&str, f64)) {
    match value {
        Value::Number(number) => {
            if let Some(value) = number.as_f64() {
                visit(&path, value);
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                walk_rec(format!("{}.{}", path, key), value, visit);
            }
        }
        _ => {}
    }
}

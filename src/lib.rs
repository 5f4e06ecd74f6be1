// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod drain;
pub mod emitter;
pub mod group;
pub mod init;
pub mod tailer;
pub mod watcher;

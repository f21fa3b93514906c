//! Default values for optional config fields.

use super::types::LogFormat;

pub fn default_true() -> bool {
    true
}

pub fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

pub fn default_ssld_count() -> usize {
    1
}

pub fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_max_users() -> i64 {
    100
}

pub fn default_ping_frequency() -> u64 {
    180
}

pub fn default_connect_frequency() -> u64 {
    300
}

pub fn default_sendq() -> usize {
    400_000
}

pub fn default_class_name() -> String {
    "default".to_string()
}

pub fn default_server_class() -> String {
    "server".to_string()
}

pub fn default_flood_burst_max() -> f64 {
    5.0
}

pub fn default_flood_burst_rate() -> f64 {
    2.5
}

pub fn default_flood_message_time() -> f64 {
    1.0
}

pub fn default_flood_message_num() -> f64 {
    1.0
}

pub fn default_flood_max_lines() -> u32 {
    20
}

pub fn default_ratelimit_tokens() -> u32 {
    30
}

pub fn default_ratelimit_period() -> u64 {
    2
}

pub fn default_reject_duration() -> u64 {
    120
}

pub fn default_registration_timeout() -> u64 {
    30
}

pub fn default_supported_client_tags() -> Vec<String> {
    vec!["typing".to_string(), "draft/typing".to_string(), "draft/reply".to_string(), "draft/react".to_string()]
}

pub fn default_sasl_service() -> String {
    "NickServ".to_string()
}

pub fn default_max_channels() -> usize {
    15
}

pub fn default_resv_reason() -> String {
    "Reserved".to_string()
}

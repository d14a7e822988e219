//! Keys of the persisted settings table and their first-boot defaults.

use crate::storage::ConfigRecord;

pub const HYSTERIA2_ENABLE: &str = "hysteria2_enable";
pub const HYSTERIA2_CONFIG: &str = "hysteria2_config";
pub const HYSTERIA2_CONFIG_REMARK: &str = "hysteria2_config_remark";
pub const HYSTERIA2_CONFIG_PORT_HOPPING: &str = "hysteria2_config_port_hopping";
pub const JWT_SECRET: &str = "jwt_secret";
pub const HUI_WEB_PORT: &str = "h_ui_web_port";
pub const HUI_WEB_CONTEXT: &str = "h_ui_web_context";
pub const HUI_CRT_PATH: &str = "h_ui_crt_path";
pub const HUI_KEY_PATH: &str = "h_ui_key_path";
pub const RESET_TRAFFIC_CRON: &str = "reset_traffic_cron";
pub const TELEGRAM_ENABLE: &str = "telegram_enable";
pub const CLASH_EXTENSION: &str = "clash_extension";

pub const NODE2_ENABLE: &str = "hysteria2_node2_enable";
pub const NODE2_CONFIG: &str = "hysteria2_node2_config";
pub const NODE2_REMARK: &str = "hysteria2_node2_remark";
pub const NODE2_DOWNGRADE_PENDING: &str = "hysteria2_node2_downgrade_pending";
pub const SOCKS5_ADDR: &str = "hysteria2_socks5_addr";
pub const SOCKS5_USER: &str = "hysteria2_socks5_user";
pub const SOCKS5_PASS: &str = "hysteria2_socks5_pass";

/// Keys whose change requires restarting the whole control plane.
pub const HOST_RESTART_KEYS: &[&str] = &[
    HUI_WEB_PORT,
    HUI_CRT_PATH,
    HUI_KEY_PATH,
    HUI_WEB_CONTEXT,
    RESET_TRAFFIC_CRON,
    TELEGRAM_ENABLE,
];

/// Node configs are stored as whole YAML documents and never travel with
/// the plain settings export.
pub const NODE_CONFIG_KEYS: &[&str] = &[HYSTERIA2_CONFIG, NODE2_CONFIG];

const DEFAULT_BASE_CONFIG: &str = "listen: :443
trafficStats:
  listen: 127.0.0.1:7653
";

/// Settings written on first boot; existing values are never overwritten.
pub fn default_records() -> Vec<ConfigRecord> {
    let secret = uuid::Uuid::new_v4().simple().to_string();
    vec![
        ConfigRecord::new(HYSTERIA2_ENABLE, "0", "Hysteria2 switch"),
        ConfigRecord::new(HYSTERIA2_CONFIG, DEFAULT_BASE_CONFIG, "Hysteria2 config"),
        ConfigRecord::new(HYSTERIA2_CONFIG_REMARK, "", "Hysteria2 remark"),
        ConfigRecord::new(HYSTERIA2_CONFIG_PORT_HOPPING, "", "Hysteria2 port hopping"),
        ConfigRecord::new(JWT_SECRET, &secret, "JWT secret"),
        ConfigRecord::new(HUI_WEB_PORT, "8081", "web port"),
        ConfigRecord::new(HUI_WEB_CONTEXT, "/", "web context"),
        ConfigRecord::new(HUI_CRT_PATH, "", "web crt path"),
        ConfigRecord::new(HUI_KEY_PATH, "", "web key path"),
        ConfigRecord::new(RESET_TRAFFIC_CRON, "", "reset traffic cron"),
        ConfigRecord::new(TELEGRAM_ENABLE, "0", "Telegram switch"),
        ConfigRecord::new(CLASH_EXTENSION, "", "Clash extension"),
        ConfigRecord::new(NODE2_ENABLE, "0", "node2 switch"),
        ConfigRecord::new(NODE2_CONFIG, "", "node2 config"),
        ConfigRecord::new(NODE2_REMARK, "", "node2 remark"),
        ConfigRecord::new(NODE2_DOWNGRADE_PENDING, "0", "node2 access downgrade pending"),
        ConfigRecord::new(SOCKS5_ADDR, "", "node2 socks5 addr"),
        ConfigRecord::new(SOCKS5_USER, "", "node2 socks5 username"),
        ConfigRecord::new(SOCKS5_PASS, "", "node2 socks5 password"),
    ]
}

// Linux link flags from /sys/class/net/<interface>/{operstate,carrier}.

/// `operstate` is "up" (Linux). None when unavailable.
pub(super) fn read_is_up(interface_name: &str) -> Option<bool> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{}/operstate", interface_name);
        let state = std::fs::read_to_string(path).ok()?;
        parse_operstate(&state)
    }
    #[cfg(not(target_os = "linux"))]
    None
}

/// `carrier` is 1 (Linux). Reading it fails with EINVAL while the link is down.
pub(super) fn read_carrier(interface_name: &str) -> Option<bool> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{}/carrier", interface_name);
        let carrier = std::fs::read_to_string(path).ok()?;
        match carrier.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }
    #[cfg(not(target_os = "linux"))]
    None
}

/// "unknown" is what many virtual devices report while passing traffic.
fn parse_operstate(state: &str) -> Option<bool> {
    match state.trim() {
        "up" | "unknown" => Some(true),
        "down" | "dormant" | "lowerlayerdown" | "notpresent" => Some(false),
        _ => None,
    }
}

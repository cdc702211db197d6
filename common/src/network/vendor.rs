use std::sync::OnceLock;

use mac_oui::Oui;
use pnet::util::MacAddr;

use crate::network::device::DeviceType;

static OUI_DB: OnceLock<Oui> = OnceLock::new();

/// Retrieves or initializes the **Organizationally unique identifier**
/// database used to map hardware addresses to vendor names.
fn get_oui_db() -> &'static Oui {
    OUI_DB.get_or_init(|| Oui::default().expect("failed to load OUI database"))
}

/// Identify the vendor of a MAC address.
pub fn get_vendor(mac: MacAddr) -> Option<String> {
    let db = get_oui_db();
    let mac_str = mac.to_string();
    match db.lookup_by_mac(&mac_str) {
        Ok(Some(entry)) => Some(entry.company_name.clone()),
        _ => None,
    }
}

/// Best-guess device classification from vendor string, hostname and
/// whether the address is the segment's gateway. Hostname patterns win
/// over vendor strings (a PS5 behind a generic NIC still announces
/// itself by name).
pub fn guess_device_type(
    vendor: Option<&str>,
    hostname: Option<&str>,
    is_gateway: bool,
) -> DeviceType {
    if is_gateway {
        return DeviceType::Router;
    }

    if let Some(host) = hostname {
        let host = host.to_ascii_lowercase();
        const CONSOLE_NAMES: [&str; 6] =
            ["ps5", "ps4", "playstation", "xbox", "nintendo", "switch"];
        if CONSOLE_NAMES.iter().any(|p| host.contains(p)) {
            return DeviceType::GamingConsole;
        }
        if host.contains("iphone") || host.contains("android") || host.contains("galaxy") {
            return DeviceType::Phone;
        }
        if host.contains("printer") {
            return DeviceType::Printer;
        }
    }

    if let Some(vendor) = vendor {
        let vendor = vendor.to_ascii_lowercase();
        if vendor.contains("sony interactive")
            || vendor.contains("nintendo")
            || (vendor.contains("microsoft") && vendor.contains("xbox"))
        {
            return DeviceType::GamingConsole;
        }
        const ROUTER_VENDORS: [&str; 6] =
            ["tp-link", "netgear", "ubiquiti", "mikrotik", "d-link", "zyxel"];
        if ROUTER_VENDORS.iter().any(|p| vendor.contains(p)) {
            return DeviceType::Router;
        }
        const PHONE_VENDORS: [&str; 3] = ["apple", "samsung", "xiaomi"];
        if PHONE_VENDORS.iter().any(|p| vendor.contains(p)) {
            return DeviceType::Phone;
        }
        if vendor.contains("hewlett") || vendor.contains("brother") || vendor.contains("epson") {
            return DeviceType::Printer;
        }
        if vendor.contains("intel") || vendor.contains("dell") || vendor.contains("lenovo") {
            return DeviceType::Computer;
        }
    }

    DeviceType::Unknown
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_flag_wins_over_everything() {
        let guess = guess_device_type(Some("Sony Interactive Entertainment"), None, true);
        assert_eq!(guess, DeviceType::Router);
    }

    #[test]
    fn hostname_patterns_win_over_vendor() {
        let guess = guess_device_type(Some("Intel Corporate"), Some("PS5-123"), false);
        assert_eq!(guess, DeviceType::GamingConsole);
    }

    #[test]
    fn vendor_fallbacks_cover_consoles_and_routers() {
        assert_eq!(
            guess_device_type(Some("Nintendo Co.,Ltd"), None, false),
            DeviceType::GamingConsole
        );
        assert_eq!(
            guess_device_type(Some("TP-LINK TECHNOLOGIES"), None, false),
            DeviceType::Router
        );
        assert_eq!(guess_device_type(None, None, false), DeviceType::Unknown);
    }
}

use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::models::DeviceIdentity;
use crate::utils::Clock;

const UNKNOWN_IP: &str = "0.0.0.0";

/// Human-readable device name: the model alone when it already carries the
/// manufacturer, otherwise `"<manufacturer> <model>"`.
pub fn compose_device_name(manufacturer: &str, model: &str) -> String {
    let manufacturer = manufacturer.trim();
    let model = model.trim();
    if manufacturer.is_empty() {
        return model.to_string();
    }
    let starts_with_manufacturer = model
        .get(..manufacturer.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(manufacturer))
        .unwrap_or(false);
    if starts_with_manufacturer {
        model.to_string()
    } else {
        format!("{} {}", manufacturer, model)
    }
}

#[cfg(target_os = "android")]
fn manufacturer_and_model() -> Option<(String, String)> {
    let prop = |name: &str| -> Option<String> {
        let out = std::process::Command::new("getprop").arg(name).output().ok()?;
        let value = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    };
    Some((prop("ro.product.manufacturer")?, prop("ro.product.model")?))
}

#[cfg(not(target_os = "android"))]
fn manufacturer_and_model() -> Option<(String, String)> {
    let read = |name: &str| -> Option<String> {
        let value = std::fs::read_to_string(format!("/sys/devices/virtual/dmi/id/{}", name)).ok()?;
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    };
    Some((read("sys_vendor")?, read("product_name")?))
}

fn hostname() -> Option<String> {
    sysinfo::System::host_name()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

pub fn device_name() -> String {
    manufacturer_and_model()
        .map(|(manufacturer, model)| compose_device_name(&manufacturer, &model))
        .or_else(hostname)
        .unwrap_or_else(|| "unknown-device".to_string())
}

/// Local IPv4 address the terminal uses to reach the collector.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outbound interface.
pub fn local_ip_address(collector_url: &str) -> String {
    let target = Url::parse(collector_url).ok().and_then(|url| {
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        (host.as_str(), port).to_socket_addrs().ok()?.find(|a| a.is_ipv4())
    });

    let Some(target) = target else {
        log::debug!("device_info: cannot resolve collector {}", collector_url);
        return UNKNOWN_IP.to_string();
    };

    UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect(target)?;
            sock.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|e| {
            log::debug!("device_info: no route to collector {}: {}", target, e);
            UNKNOWN_IP.to_string()
        })
}

pub fn discover_identity(collector_url: &str) -> DeviceIdentity {
    DeviceIdentity {
        device_name: device_name(),
        ip_address: local_ip_address(collector_url),
    }
}

/// Uptime summary shown to operators deciding whether to restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UptimeInfo {
    pub uptime: Duration,
    pub last_reboot: DateTime<Utc>,
    pub suggested_interval: Duration,
    pub next_suggested_reboot: DateTime<Utc>,
}

pub fn uptime_info(clock: &dyn Clock, suggested_restart_hours: u64) -> UptimeInfo {
    let uptime = clock.uptime();
    let last_reboot = clock.last_reboot();
    let suggested_interval = Duration::from_secs(suggested_restart_hours * 3600);
    let next_suggested_reboot = last_reboot
        + chrono::Duration::from_std(suggested_interval).unwrap_or(chrono::Duration::zero());
    UptimeInfo {
        uptime,
        last_reboot,
        suggested_interval,
        next_suggested_reboot,
    }
}

/// `"2 days, 3 hours, 0 minutes, 5 seconds"`. Larger units are omitted while
/// they and everything above them are zero.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let seconds = total % 60;
    let minutes = (total / 60) % 60;
    let hours = (total / 3600) % 24;
    let days = total / 86_400;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{} days, ", days));
    }
    if hours > 0 || days > 0 {
        out.push_str(&format!("{} hours, ", hours));
    }
    if minutes > 0 || hours > 0 || days > 0 {
        out.push_str(&format!("{} minutes, ", minutes));
    }
    out.push_str(&format!("{} seconds", seconds));
    out
}

//! Target platform gate
//!
//! Code signatures are only enforced by the OpenHarmony loader. Callers check
//! here before scanning; the scan itself works anywhere.

pub const TARGET_PLATFORM: &str = "OpenHarmony";

#[inline]
pub fn is_supported() -> bool {
    cfg!(target_env = "ohos")
}

pub fn current_platform() -> String {
    format!(
        "{}-{}{}",
        std::env::consts::ARCH,
        std::env::consts::OS,
        if cfg!(target_env = "ohos") { "-ohos" } else { "" }
    )
}

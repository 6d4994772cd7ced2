//! Monitor backends.

pub mod ddcutil;
pub mod sysfs;

use crate::{config::BackendCfg, device::DeviceEnumerator};

/// Creates the enumerator selected by the configuration.
pub fn build_enumerator(backend: &BackendCfg) -> Box<dyn DeviceEnumerator> {
    match backend {
        BackendCfg::Sysfs { root } => Box::new(sysfs::SysfsEnumerator::new(root.clone())),
        BackendCfg::Ddcutil { binary } => Box::new(ddcutil::DdcutilEnumerator::new(binary.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn backend_selection() {
        let sysfs = build_enumerator(&BackendCfg::Sysfs {
            root: PathBuf::from("/sys/class/backlight"),
        });
        let ddc = build_enumerator(&BackendCfg::Ddcutil {
            binary: PathBuf::from("ddcutil"),
        });

        assert_eq!(sysfs.name(), "sysfs");
        assert_eq!(ddc.name(), "ddcutil");
    }
}

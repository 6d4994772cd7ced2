//! Device abstraction and trait definitions.
//!
//! The controller never speaks a brightness protocol itself. Backends hand it
//! [`MonitorDevice`] handles through a [`DeviceEnumerator`], and every
//! hardware call goes through those traits.

use anyhow::Result;
use async_trait::async_trait;

/// One attached display with brightness I/O.
///
/// Handles are owned by whoever received them from
/// [`DeviceEnumerator::enumerate`] and must be disposed exactly once.
///
/// # Example
///
/// ```no_run
/// use dimmerd::device::MonitorDevice;
/// use anyhow::Result;
///
/// #[derive(Debug)]
/// struct FixedPanel;
///
/// #[async_trait::async_trait]
/// impl MonitorDevice for FixedPanel {
///     fn id(&self) -> &str { "panel-0" }
///     async fn brightness(&self) -> Result<i32> { Ok(70) }
///     async fn set_brightness(&self, _value: i32) -> Result<()> { Ok(()) }
///     async fn dispose(&self) -> Result<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait MonitorDevice: Send + Sync + core::fmt::Debug {
    /// Stable identity of the device, compared case-insensitively.
    fn id(&self) -> &str;

    /// Reads the current brightness.
    async fn brightness(&self) -> Result<i32>;

    /// Writes a new brightness.
    async fn set_brightness(&self, value: i32) -> Result<()>;

    /// Releases the hardware handle. Later I/O on the handle fails.
    async fn dispose(&self) -> Result<()>;
}

/// Source of live device snapshots.
///
/// Every call yields independent handles; the caller disposes the ones it
/// doesn't keep.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<Box<dyn MonitorDevice>>>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Case-insensitive identity comparison shared by the registry and the
/// name cache.
pub fn same_device(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Case-insensitive prefix test used for out-of-band brightness reports.
pub fn instance_matches(instance_name: &str, device_id: &str) -> bool {
    instance_name
        .get(..device_id.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(device_id))
}

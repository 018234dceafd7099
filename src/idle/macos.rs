//! Idle time via the IOKit `HIDIdleTime` property.

use std::ffi::CString;
use std::time::Duration;

use core_foundation::base::{CFAllocatorRef, CFTypeRef, TCFType};
use core_foundation::number::CFNumber;
use core_foundation::string::{CFString, CFStringRef};

use super::{IdleSource, PlatformQueryError};

#[link(name = "IOKit", kind = "framework")]
unsafe extern "C" {
    fn IOServiceGetMatchingService(main_port: u32, matching: CFTypeRef) -> u32;
    fn IOServiceMatching(name: *const std::os::raw::c_char) -> CFTypeRef;
    fn IORegistryEntryCreateCFProperty(
        entry: u32,
        key: CFStringRef,
        allocator: CFAllocatorRef,
        options: u32,
    ) -> CFTypeRef;
    fn IOObjectRelease(object: u32) -> i32;
}

/// Idle source backed by the `IOHIDSystem` registry entry.
pub struct IoKitIdleSource {
    service_name: CString,
    key: CFString,
}

// CFString is immutable once created; only this source touches it.
unsafe impl Send for IoKitIdleSource {}

impl IoKitIdleSource {
    pub fn new() -> Self {
        Self {
            service_name: CString::from(c"IOHIDSystem"),
            key: CFString::from_static_string("HIDIdleTime"),
        }
    }
}

impl Default for IoKitIdleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSource for IoKitIdleSource {
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError> {
        // SAFETY: every IOKit object obtained here is released before return,
        // and the CF property is wrapped under the create rule.
        unsafe {
            let matching = IOServiceMatching(self.service_name.as_ptr());
            if matching.is_null() {
                return Err(PlatformQueryError::QueryFailed(
                    "IOServiceMatching(IOHIDSystem) returned null".to_string(),
                ));
            }

            // Consumes `matching`.
            let service = IOServiceGetMatchingService(0, matching);
            if service == 0 {
                return Err(PlatformQueryError::QueryFailed(
                    "IOHIDSystem service not found".to_string(),
                ));
            }

            let property = IORegistryEntryCreateCFProperty(
                service,
                self.key.as_concrete_TypeRef(),
                std::ptr::null(),
                0,
            );
            IOObjectRelease(service);

            if property.is_null() {
                return Err(PlatformQueryError::QueryFailed(
                    "HIDIdleTime property missing".to_string(),
                ));
            }

            let number = CFNumber::wrap_under_create_rule(property as *mut _);
            let nanos = number.to_i64().ok_or_else(|| {
                PlatformQueryError::QueryFailed("HIDIdleTime is not an integer".to_string())
            })?;

            let nanos = u64::try_from(nanos).map_err(|_| {
                PlatformQueryError::QueryFailed(format!("negative HIDIdleTime: {nanos}"))
            })?;

            Ok(Duration::from_nanos(nanos))
        }
    }
}

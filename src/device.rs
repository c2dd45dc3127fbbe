//! Device handle and process-wide library lifetime.
//!
//! ## Library reference counting
//!
//! The vendor library keeps global state: its startup and shutdown affect the whole
//! process. [`SharedLibrary`] wraps one library instance and hands out a
//! [`LibraryLease`] to every component that needs it. The first lease starts the
//! library, dropping the last lease shuts it down.
//!
//! A startup failure is logged and does not prevent the lease from being issued; opening
//! a camera through that lease then fails instead.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{CameraError, DeviceResult, Result};
use crate::traits::{CameraTransport, Command, DeviceLibrary, EnumAttribute, FrameInfo, UintAttribute};

#[derive(Debug, Default)]
struct LibraryState {
    users: usize,
    started: bool,
}

struct LibraryCore<L> {
    library: L,
    state: Mutex<LibraryState>,
}

/// A vendor library shared by every camera component of the process.
///
/// Create one per process and clone it into each component.
pub struct SharedLibrary<L: DeviceLibrary> {
    core: Arc<LibraryCore<L>>,
}

impl<L: DeviceLibrary> Clone for SharedLibrary<L> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<L: DeviceLibrary> SharedLibrary<L> {
    /// Wrap a library. Nothing is started until the first lease is taken.
    pub fn new(library: L) -> Self {
        Self {
            core: Arc::new(LibraryCore {
                library,
                state: Mutex::new(LibraryState::default()),
            }),
        }
    }

    /// Register a user of the library, starting it if this is the first one.
    pub fn acquire(&self) -> LibraryLease<L> {
        // A poisoned lock still guards a consistent counter.
        let mut state = self.core.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.started {
            tracing::debug!(users = state.users + 1, "device library already initialized");
        } else {
            match self.core.library.startup() {
                Ok(()) => {
                    state.started = true;
                    tracing::info!("device library initialized");
                }
                Err(err) => {
                    tracing::error!(error = %err, "unable to initialize device library");
                }
            }
        }
        state.users += 1;

        LibraryLease {
            core: Arc::clone(&self.core),
        }
    }

    /// Number of leases currently held.
    pub fn users(&self) -> usize {
        self.core
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .users
    }

    /// Whether the library is currently started.
    pub fn is_started(&self) -> bool {
        self.core
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started
    }
}

/// One component's claim on the shared library.
pub struct LibraryLease<L: DeviceLibrary> {
    core: Arc<LibraryCore<L>>,
}

impl<L: DeviceLibrary> LibraryLease<L> {
    /// Open the camera at `address`.
    pub fn open(&self, address: &str) -> Result<DeviceHandle<L::Camera>> {
        tracing::debug!(address, "opening camera");
        let transport = self
            .core
            .library
            .open_by_address(address)
            .map_err(|source| CameraError::Open {
                address: address.to_owned(),
                source,
            })?;

        Ok(DeviceHandle {
            transport,
            address: address.to_owned(),
        })
    }
}

impl<L: DeviceLibrary> Drop for LibraryLease<L> {
    fn drop(&mut self) {
        let mut state = self.core.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.users == 0 {
            tracing::error!("device library user count underflow");
            return;
        }
        state.users -= 1;

        if state.users == 0 && state.started {
            self.core.library.shutdown();
            state.started = false;
            tracing::info!("device library uninitialized (last user released)");
        }
    }
}

/// An opened connection to one physical camera.
///
/// The handle is valid from a successful open until [`DeviceHandle::close`] consumes it,
/// so no operation can reach a closed device.
pub struct DeviceHandle<T: CameraTransport> {
    transport: T,
    address: String,
}

impl<T: CameraTransport> DeviceHandle<T> {
    /// Address the camera was opened with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Close the connection.
    pub fn close(mut self) {
        tracing::debug!(address = %self.address, "closing camera");
        self.transport.close();
    }

    /// Read an enumerated attribute.
    pub fn get_enum(&mut self, attribute: EnumAttribute) -> DeviceResult<String> {
        self.transport.enum_get(attribute)
    }

    /// Write an enumerated attribute.
    pub fn set_enum(&mut self, attribute: EnumAttribute, value: &str) -> DeviceResult<()> {
        tracing::debug!(attribute = attribute.name(), value, "set attribute");
        self.transport.enum_set(attribute, value)
    }

    /// Read an unsigned integer attribute.
    pub fn get_uint(&mut self, attribute: UintAttribute) -> DeviceResult<u32> {
        self.transport.uint_get(attribute)
    }

    /// Write an unsigned integer attribute.
    pub fn set_uint(&mut self, attribute: UintAttribute, value: u32) -> DeviceResult<()> {
        tracing::debug!(attribute = attribute.name(), value, "set attribute");
        self.transport.uint_set(attribute, value)
    }

    /// Valid `(min, max)` range of an unsigned integer attribute.
    pub fn query_range(&mut self, attribute: UintAttribute) -> DeviceResult<(u32, u32)> {
        self.transport.uint_range(attribute)
    }

    /// Run a device command.
    pub fn run_command(&mut self, command: Command) -> DeviceResult<()> {
        tracing::debug!(command = command.name(), "run command");
        self.transport.run_command(command)
    }

    pub(crate) fn capture_start(&mut self) -> DeviceResult<()> {
        self.transport.capture_start()
    }

    pub(crate) fn capture_end(&mut self) -> DeviceResult<()> {
        self.transport.capture_end()
    }

    pub(crate) fn queue_frame(&mut self, slot: usize, capacity: usize) -> DeviceResult<()> {
        self.transport.queue_frame(slot, capacity)
    }

    pub(crate) fn wait_frame_done(
        &mut self,
        slot: usize,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> DeviceResult<FrameInfo> {
        self.transport.wait_frame_done(slot, buffer, timeout)
    }

    pub(crate) fn clear_queue(&mut self) -> DeviceResult<()> {
        self.transport.clear_queue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::mock::{MockCamera, MockLibrary};

    #[test]
    fn test_library_started_once_for_many_users() {
        let mock = MockLibrary::new();
        let library = SharedLibrary::new(mock.clone());

        let first = library.acquire();
        let second = library.acquire();
        assert_eq!(library.users(), 2);
        assert_eq!(mock.startups(), 1);

        drop(first);
        assert!(library.is_started());
        assert_eq!(mock.shutdowns(), 0);

        drop(second);
        assert!(!library.is_started());
        assert_eq!(mock.shutdowns(), 1);
    }

    #[test]
    fn test_failed_startup_still_issues_lease() {
        let mock = MockLibrary::new().fail_startup(DeviceError::Resources);
        mock.add_camera("10.0.0.5", MockCamera::new());
        let library = SharedLibrary::new(mock.clone());

        let lease = library.acquire();
        assert!(!library.is_started());

        let err = lease.open("10.0.0.5").err();
        assert!(matches!(
            err,
            Some(CameraError::Open {
                source: DeviceError::Resources,
                ..
            })
        ));

        drop(lease);
        assert_eq!(mock.shutdowns(), 0, "a library that never started is not shut down");
    }

    #[test]
    fn test_open_unknown_address_fails() {
        let library = SharedLibrary::new(MockLibrary::new());
        let lease = library.acquire();

        let err = lease.open("192.168.1.99").err();
        assert!(matches!(
            err,
            Some(CameraError::Open {
                source: DeviceError::NotFound,
                ..
            })
        ));
    }

    #[test]
    fn test_handle_round_trips_attributes() {
        let mock = MockLibrary::new();
        let probe = mock.add_camera("10.0.0.5", MockCamera::new());
        let library = SharedLibrary::new(mock);
        let lease = library.acquire();

        let mut handle = lease.open("10.0.0.5").expect("open should succeed");
        assert_eq!(handle.address(), "10.0.0.5");

        handle
            .set_enum(EnumAttribute::AcquisitionMode, "SingleFrame")
            .expect("set should succeed");
        assert_eq!(
            handle.get_enum(EnumAttribute::AcquisitionMode),
            Ok("SingleFrame".to_owned())
        );

        handle.close();
        assert!(!probe.is_open());
    }
}

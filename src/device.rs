//! Device collaborator contract and identity.
//!
//! The heat-pump wire protocol sits behind [`HeatPumpConnector`] /
//! [`HeatPumpSession`] so the poll loop, clock reconciler and tests never
//! depend on a real serial port. A session is short-lived: opened fresh for
//! each interaction and released on every exit path.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, warn};

use crate::value::RawRegisterSnapshot;

/// Errors from the device collaborator.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("request timed out")]
    Timeout,

    #[error("login rejected: {0}")]
    Login(String),

    #[error("malformed response: {0}")]
    Protocol(String),
}

/// An open session with the heat-pump controller.
///
/// All operations may fail; [`close`](HeatPumpSession::close) consumes the
/// session and must release the underlying handle unconditionally.
#[async_trait]
pub trait HeatPumpSession: Send {
    /// Perform the login handshake.
    async fn login(&mut self) -> Result<(), DeviceError>;

    /// Read a bulk snapshot of all known registers.
    async fn query(&mut self) -> Result<RawRegisterSnapshot, DeviceError>;

    /// Read the controller firmware version.
    async fn get_version(&mut self) -> Result<String, DeviceError>;

    /// Read the controller serial number.
    async fn get_serial_number(&mut self) -> Result<u32, DeviceError>;

    /// Read the device clock: timestamp plus weekday (1 = Monday).
    async fn get_date_time(&mut self) -> Result<(NaiveDateTime, u8), DeviceError>;

    /// Set the device clock to the current host time.
    async fn set_date_time_now(&mut self) -> Result<NaiveDateTime, DeviceError>;

    /// Log out of the controller.
    async fn logout(&mut self) -> Result<(), DeviceError>;

    /// Release the connection.
    async fn close(self);
}

/// Factory for short-lived device sessions.
#[async_trait]
pub trait HeatPumpConnector: Send + Sync {
    type Session: HeatPumpSession;

    /// Open the transport. Login is a separate step on the session.
    async fn open(&self) -> Result<Self::Session, DeviceError>;
}

/// Release a session: best-effort logout, then close.
///
/// Logout failures are swallowed; the device may be physically disconnected
/// or power-cycled, so a symmetric logout cannot always be guaranteed.
pub async fn release<S: HeatPumpSession>(mut session: S) {
    if let Err(err) = session.logout().await {
        debug!(error = %err, "logout failed, closing connection anyway");
    }
    session.close().await;
}

/// Identity of the bridged device, captured once at startup and immutable
/// afterwards. Feeds the discovery payloads' device metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub sw_version: Option<String>,
    pub serial_number: Option<String>,
}

const MANUFACTURER: &str = "Heliotherm";
const MODEL: &str = "Basic Comfort";
const DISPLAY_NAME: &str = "Heliotherm Heat Pump";

impl DeviceIdentity {
    /// Fallback identity used when the device cannot be interrogated.
    pub fn degraded() -> Self {
        Self {
            manufacturer: MANUFACTURER.to_string(),
            model: "Unknown".to_string(),
            name: DISPLAY_NAME.to_string(),
            sw_version: None,
            serial_number: None,
        }
    }

    /// Interrogate the device for version and serial number.
    ///
    /// Never fails: any device error degrades to an identity with model
    /// "Unknown" and no serial, and the bridge keeps running.
    pub async fn read<C: HeatPumpConnector>(connector: &C) -> Self {
        match Self::try_read(connector).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "device interrogation failed, using degraded identity");
                Self::degraded()
            }
        }
    }

    async fn try_read<C: HeatPumpConnector>(connector: &C) -> Result<Self, DeviceError> {
        let mut session = connector.open().await?;

        let result = async {
            session.login().await?;
            let version = session.get_version().await?;
            let serial = session.get_serial_number().await?;
            Ok::<_, DeviceError>((version, serial))
        }
        .await;

        release(session).await;

        let (version, serial) = result?;
        Ok(Self {
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            name: DISPLAY_NAME.to_string(),
            sw_version: Some(version),
            serial_number: Some(serial.to_string()),
        })
    }
}

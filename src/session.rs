//! Per-poll device session lifecycle.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::device::{release, DeviceError, HeatPumpConnector, HeatPumpSession};
use crate::normalize::normalize;
use crate::value::CanonicalValueMap;

/// Errors from a poll cycle. All of them are device-transient: the cycle
/// yields no data and the next tick retries naturally.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("failed to open device session: {0}")]
    Open(#[source] DeviceError),

    #[error("login failed: {0}")]
    Login(#[source] DeviceError),

    #[error("register query failed: {0}")]
    Query(#[source] DeviceError),
}

/// Runs one short-lived device session per poll cycle.
pub struct SessionRunner<C> {
    connector: Arc<C>,
}

impl<C: HeatPumpConnector> SessionRunner<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self { connector }
    }

    /// Open a session, log in, query a raw snapshot and normalize it.
    ///
    /// The device handle is released on every exit path once the open
    /// succeeded: logout is attempted best-effort, the connection is always
    /// closed.
    pub async fn poll(&self) -> Result<CanonicalValueMap, PollError> {
        let mut session = self.connector.open().await.map_err(PollError::Open)?;

        let result = async {
            session.login().await.map_err(PollError::Login)?;
            session.query().await.map_err(PollError::Query)
        }
        .await;

        release(session).await;

        let snapshot = result?;
        debug!(registers = snapshot.len(), "queried register snapshot");
        Ok(normalize(&snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{RawRegisterSnapshot, RawValue, Value};
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock session that records lifecycle calls on the shared connector.
    struct MockSession {
        connector: Arc<MockConnector>,
        fail_login: bool,
        fail_query: bool,
    }

    #[derive(Default)]
    struct MockConnector {
        fail_open: bool,
        fail_login: bool,
        fail_query: bool,
        logouts: AtomicUsize,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl HeatPumpSession for MockSession {
        async fn login(&mut self) -> Result<(), DeviceError> {
            if self.fail_login {
                return Err(DeviceError::Login("bad password".into()));
            }
            Ok(())
        }

        async fn query(&mut self) -> Result<RawRegisterSnapshot, DeviceError> {
            if self.fail_query {
                return Err(DeviceError::Protocol("garbled frame".into()));
            }
            Ok(vec![
                ("Temp. Aussen".to_string(), RawValue::Float(3.5)),
                ("Hauptschalter".to_string(), RawValue::Bool(true)),
            ])
        }

        async fn get_version(&mut self) -> Result<String, DeviceError> {
            Ok("3.0.20".to_string())
        }

        async fn get_serial_number(&mut self) -> Result<u32, DeviceError> {
            Ok(123456)
        }

        async fn get_date_time(&mut self) -> Result<(NaiveDateTime, u8), DeviceError> {
            Err(DeviceError::Protocol("not scripted".into()))
        }

        async fn set_date_time_now(&mut self) -> Result<NaiveDateTime, DeviceError> {
            Err(DeviceError::Protocol("not scripted".into()))
        }

        async fn logout(&mut self) -> Result<(), DeviceError> {
            self.connector.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(self) {
            self.connector.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingConnector {
        inner: Arc<MockConnector>,
    }

    #[async_trait]
    impl HeatPumpConnector for CountingConnector {
        type Session = MockSession;

        async fn open(&self) -> Result<MockSession, DeviceError> {
            if self.inner.fail_open {
                return Err(DeviceError::Timeout);
            }
            Ok(MockSession {
                connector: self.inner.clone(),
                fail_login: self.inner.fail_login,
                fail_query: self.inner.fail_query,
            })
        }
    }

    fn runner(inner: MockConnector) -> (SessionRunner<CountingConnector>, Arc<MockConnector>) {
        let inner = Arc::new(inner);
        let connector = Arc::new(CountingConnector {
            inner: inner.clone(),
        });
        (SessionRunner::new(connector), inner)
    }

    #[tokio::test]
    async fn test_poll_returns_normalized_map() {
        let (runner, counters) = runner(MockConnector::default());

        let map = runner.poll().await.unwrap();
        assert_eq!(map["tempaussen"], Value::Number(3.5));
        assert_eq!(map["hauptschalter"], Value::Text("ON".to_string()));

        assert_eq!(counters.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_releases_session_on_login_failure() {
        let (runner, counters) = runner(MockConnector {
            fail_login: true,
            ..Default::default()
        });

        let err = runner.poll().await.unwrap_err();
        assert!(matches!(err, PollError::Login(_)));

        // Logout attempted best-effort, close guaranteed.
        assert_eq!(counters.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_releases_session_on_query_failure() {
        let (runner, counters) = runner(MockConnector {
            fail_query: true,
            ..Default::default()
        });

        let err = runner.poll().await.unwrap_err();
        assert!(matches!(err, PollError::Query(_)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_open_failure_has_nothing_to_release() {
        let (runner, counters) = runner(MockConnector {
            fail_open: true,
            ..Default::default()
        });

        let err = runner.poll().await.unwrap_err();
        assert!(matches!(err, PollError::Open(_)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
    }
}

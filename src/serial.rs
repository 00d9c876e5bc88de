//! Serial transport implementation of the device contract.
//!
//! The controller speaks a framed request/response protocol over RS-232:
//! a fixed six-byte header, a length byte, an ASCII payload of the form
//! `~CMD;` and a trailing additive checksum. Sessions are short-lived; the
//! serial handle is released when the session is closed (or dropped).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::trace;

use crate::config::HeatPumpConfig;
use crate::device::{DeviceError, HeatPumpConnector, HeatPumpSession};
use crate::value::{RawRegisterSnapshot, RawValue};

const REQUEST_HEADER: [u8; 6] = [0x02, 0xFD, 0xD0, 0xE0, 0x00, 0x00];
const RESPONSE_HEADER_PREFIX: [u8; 4] = [0x02, 0xFD, 0xE0, 0xD0];
const MAX_PAYLOAD_LEN: usize = 253;

/// Opens serial sessions to the heat pump.
pub struct SerialConnector {
    device: String,
    baud_rate: u32,
    timeout: Duration,
    scan_limit: u16,
}

impl SerialConnector {
    pub fn new(
        device: impl Into<String>,
        baud_rate: u32,
        timeout: Duration,
        scan_limit: u16,
    ) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            timeout,
            scan_limit,
        }
    }

    pub fn from_config(config: &HeatPumpConfig) -> Self {
        Self::new(
            &config.device,
            config.baud_rate,
            Duration::from_millis(config.timeout_ms),
            config.register_scan_limit,
        )
    }
}

#[async_trait]
impl HeatPumpConnector for SerialConnector {
    type Session = SerialSession;

    async fn open(&self) -> Result<SerialSession, DeviceError> {
        let builder = tokio_serial::new(&self.device, self.baud_rate);
        let port = builder
            .open_native_async()
            .map_err(|e| DeviceError::Serial(e.to_string()))?;

        Ok(SerialSession {
            port,
            timeout: self.timeout,
            scan_limit: self.scan_limit,
        })
    }
}

/// An open serial session.
pub struct SerialSession {
    port: SerialStream,
    timeout: Duration,
    scan_limit: u16,
}

impl SerialSession {
    async fn command(&mut self, cmd: &str) -> Result<String, DeviceError> {
        let frame = build_frame(cmd)?;
        trace!(cmd, "sending request");

        tokio::time::timeout(self.timeout, self.port.write_all(&frame))
            .await
            .map_err(|_| DeviceError::Timeout)??;

        self.receive().await
    }

    async fn receive(&mut self) -> Result<String, DeviceError> {
        let mut header = [0u8; 6];
        self.read_exact(&mut header).await?;
        if header[..4] != RESPONSE_HEADER_PREFIX {
            return Err(DeviceError::Protocol(format!(
                "unexpected response header {:02x?}",
                header
            )));
        }

        let mut len = [0u8; 1];
        self.read_exact(&mut len).await?;

        // Payload plus trailing checksum byte.
        let mut body = vec![0u8; len[0] as usize + 1];
        self.read_exact(&mut body).await?;
        let (payload, check) = body.split_at(body.len() - 1);

        let mut sum = checksum(&header).wrapping_add(len[0]);
        sum = sum.wrapping_add(checksum(payload));
        if check[0] != sum {
            return Err(DeviceError::Protocol(format!(
                "checksum mismatch (got {:#04x}, expected {:#04x})",
                check[0], sum
            )));
        }

        let text = std::str::from_utf8(payload)
            .map_err(|e| DeviceError::Protocol(format!("non-UTF-8 payload: {}", e)))?;
        let text = text.trim().trim_start_matches('~').trim_end_matches(';');
        trace!(response = text, "received response");
        Ok(text.to_string())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DeviceError> {
        tokio::time::timeout(self.timeout, self.port.read_exact(buf))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        Ok(())
    }
}

#[async_trait]
impl HeatPumpSession for SerialSession {
    async fn login(&mut self) -> Result<(), DeviceError> {
        let response = self.command("LIN").await?;
        if response == "OK" {
            Ok(())
        } else {
            Err(DeviceError::Login(response))
        }
    }

    async fn query(&mut self) -> Result<RawRegisterSnapshot, DeviceError> {
        let mut snapshot = RawRegisterSnapshot::new();

        for nr in 0..=self.scan_limit {
            let response = self.command(&format!("SP,NR={}", nr)).await?;
            if !response.starts_with("SP,") {
                // Parameter not present on this controller model.
                continue;
            }

            let fields = parse_fields(&response);
            let name = fields.iter().find(|(k, _)| *k == "NAME").map(|(_, v)| *v);
            let val = fields.iter().find(|(k, _)| *k == "VAL").map(|(_, v)| *v);

            if let (Some(name), Some(val)) = (name, val) {
                snapshot.push((name.to_string(), parse_value(val, &fields)));
            }
        }

        Ok(snapshot)
    }

    async fn get_version(&mut self) -> Result<String, DeviceError> {
        let response = self.command("SP,NR=9").await?;
        parse_fields(&response)
            .iter()
            .find(|(k, _)| *k == "NAME")
            .map(|(_, v)| v.to_string())
            .ok_or_else(|| DeviceError::Protocol(format!("no version in '{}'", response)))
    }

    async fn get_serial_number(&mut self) -> Result<u32, DeviceError> {
        let response = self.command("RID").await?;
        let serial = response
            .strip_prefix("RID,")
            .ok_or_else(|| DeviceError::Protocol(format!("unexpected RID response '{}'", response)))?;
        serial
            .trim()
            .parse()
            .map_err(|_| DeviceError::Protocol(format!("invalid serial number '{}'", serial)))
    }

    async fn get_date_time(&mut self) -> Result<(NaiveDateTime, u8), DeviceError> {
        let response = self.command("CLK").await?;
        parse_clock(&response)
    }

    async fn set_date_time_now(&mut self) -> Result<NaiveDateTime, DeviceError> {
        let now = Local::now().naive_local();
        let cmd = format!(
            "CLK,DA={},TI={},WD={}",
            now.format("%d.%m.%y"),
            now.format("%H:%M:%S"),
            now.weekday().number_from_monday()
        );
        let response = self.command(&cmd).await?;
        parse_clock(&response).map(|(dt, _)| dt)
    }

    async fn logout(&mut self) -> Result<(), DeviceError> {
        let response = self.command("LOUT").await?;
        if response == "OK" {
            Ok(())
        } else {
            Err(DeviceError::Protocol(format!(
                "unexpected logout response '{}'",
                response
            )))
        }
    }

    async fn close(self) {
        // The serial handle is released on drop.
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn build_frame(cmd: &str) -> Result<Vec<u8>, DeviceError> {
    let payload = format!("~{};", cmd);
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(DeviceError::Protocol(format!(
            "command too long ({} bytes)",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&REQUEST_HEADER);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload.as_bytes());
    frame.push(checksum(&frame));
    Ok(frame)
}

/// Split a `CMD,KEY=VALUE,...` payload into its key/value fields.
fn parse_fields(payload: &str) -> Vec<(&str, &str)> {
    payload
        .split(',')
        .skip(1)
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

/// Type a register value. The wire carries no explicit type, so integers
/// with a 0..1 value range are taken as flags; everything else keeps its
/// numeric or textual form.
fn parse_value(val: &str, fields: &[(&str, &str)]) -> RawValue {
    let field = |key: &str| fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

    if let Ok(i) = val.parse::<i64>() {
        let boolish = field("MIN") == Some("0") && field("MAX") == Some("1");
        if boolish {
            return RawValue::Bool(i != 0);
        }
        return RawValue::Int(i);
    }
    if let Ok(f) = val.parse::<f64>() {
        return RawValue::Float(f);
    }
    RawValue::Text(val.to_string())
}

/// Parse a `CLK,DA=dd.mm.yy,TI=hh:mm:ss,WD=n` payload.
fn parse_clock(payload: &str) -> Result<(NaiveDateTime, u8), DeviceError> {
    let fields = parse_fields(payload);
    let field = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .ok_or_else(|| DeviceError::Protocol(format!("missing {} in '{}'", key, payload)))
    };

    let date = NaiveDate::parse_from_str(field("DA")?, "%d.%m.%y")
        .map_err(|e| DeviceError::Protocol(format!("invalid date: {}", e)))?;
    let time = NaiveTime::parse_from_str(field("TI")?, "%H:%M:%S")
        .map_err(|e| DeviceError::Protocol(format!("invalid time: {}", e)))?;
    let weekday = field("WD")?
        .parse()
        .map_err(|_| DeviceError::Protocol(format!("invalid weekday in '{}'", payload)))?;

    Ok((date.and_time(time), weekday))
}

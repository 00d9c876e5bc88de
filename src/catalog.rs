//! Static channel catalog and Home Assistant discovery payloads.
//!
//! One descriptor per exposed register, constructed once from a hard-coded
//! table and immutable for the process lifetime. Publication is idempotent:
//! the unique identifier of every channel is a stable slug derived from its
//! display name plus the node identifier, so republishing never creates
//! duplicate or renamed entities downstream.

use serde::Serialize;

use crate::device::DeviceIdentity;
use crate::normalize::canonical_key;

/// Channel kind: measurement or binary state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Sensor,
    BinarySensor,
}

impl ChannelKind {
    /// Home Assistant component name used in discovery topics.
    pub fn component(&self) -> &'static str {
        match self {
            ChannelKind::Sensor => "sensor",
            ChannelKind::BinarySensor => "binary_sensor",
        }
    }
}

/// Semantic class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    // Measurement classes
    Temperature,
    Pressure,
    Duration,
    Energy,
    Enum,
    // Binary-state classes
    Running,
    Problem,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Temperature => "temperature",
            DeviceClass::Pressure => "pressure",
            DeviceClass::Duration => "duration",
            DeviceClass::Energy => "energy",
            DeviceClass::Enum => "enum",
            DeviceClass::Running => "running",
            DeviceClass::Problem => "problem",
        }
    }
}

/// Static description of one exposed channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDescriptor {
    /// Display name; also the device-native register name this channel maps to.
    pub name: &'static str,
    pub kind: ChannelKind,
    pub device_class: Option<DeviceClass>,
    pub unit: Option<&'static str>,
    pub precision: Option<u8>,
    pub icon: Option<&'static str>,
}

impl ChannelDescriptor {
    const fn sensor(name: &'static str) -> Self {
        Self {
            name,
            kind: ChannelKind::Sensor,
            device_class: None,
            unit: None,
            precision: None,
            icon: None,
        }
    }

    const fn binary(name: &'static str) -> Self {
        Self {
            name,
            kind: ChannelKind::BinarySensor,
            device_class: None,
            unit: None,
            precision: None,
            icon: None,
        }
    }

    const fn class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    const fn precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    const fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    /// Stable lowercase slug; also the key of this channel in the values map.
    pub fn slug(&self) -> String {
        canonical_key(self.name)
    }
}

use ChannelDescriptor as C;
use DeviceClass as D;

/// The fixed channel table for the Basic Comfort register set.
pub const CHANNELS: &[ChannelDescriptor] = &[
    C::sensor("Betriebsart").class(D::Enum).icon("mdi:knob"),
    C::sensor("BSZ EQ Betriebsstunden").class(D::Duration).unit("h").precision(0).icon("mdi:wrench-clock"),
    C::sensor("BSZ EQ Schaltungen").precision(0).icon("mdi:counter"),
    C::sensor("BSZ HKP Betriebsstunden").class(D::Duration).unit("h").precision(0).icon("mdi:wrench-clock"),
    C::sensor("BSZ HKP Schaltung").precision(0).icon("mdi:counter"),
    C::sensor("BSZ Verdichter akt. Laufzeit").class(D::Duration).unit("s").precision(0).icon("mdi:wrench-clock"),
    C::sensor("BSZ Verdichter Betriebsst. ges").class(D::Duration).unit("h").precision(0).icon("mdi:wrench-clock"),
    C::sensor("BSZ Verdichter Betriebsst. HKR").class(D::Duration).unit("h").precision(0).icon("mdi:wrench-clock"),
    C::sensor("BSZ Verdichter Betriebsst. WW").class(D::Duration).unit("h").precision(0).icon("mdi:wrench-clock"),
    C::sensor("BSZ Verdichter Schaltung WW").icon("mdi:counter"),
    C::sensor("BSZ Verdichter Schaltungen").icon("mdi:counter"),
    C::sensor("BSZ WWV Betriebsstunden").class(D::Duration).unit("h").icon("mdi:wrench-clock"),
    C::sensor("BSZ WWV Schaltungen").icon("mdi:counter"),
    C::sensor("BSZ ZIPWW Betriebsstunden").class(D::Duration).unit("h").icon("mdi:wrench-clock"),
    C::sensor("BSZ ZIPWW Schaltungen").icon("mdi:counter"),
    C::sensor("Energiezaehler").icon("mdi:counter"),
    C::binary("EQ Pumpe (Ventilator)").class(D::Running).icon("mdi:pump"),
    C::sensor("Frischwasserpumpe"),
    C::binary("FWS Stroemungsschalter").class(D::Running).icon("mdi:light-switch-off"),
    C::binary("FWS Type"),
    C::binary("Hauptschalter").class(D::Running).icon("mdi:light-switch-off"),
    C::binary("Heizkreispumpe").class(D::Running).icon("mdi:pump"),
    C::sensor("HKR Absenktemp. (K)").class(D::Temperature).unit("K").precision(0).icon("mdi:thermometer-chevron-down"),
    C::sensor("HKR Aufheiztemp. (K)").class(D::Temperature).unit("K").precision(0).icon("mdi:thermometer-chevron-up"),
    C::sensor("HKR Heizgrenze").class(D::Temperature).unit("°C").icon("mdi:thermometer-high"),
    C::sensor("HKR RLT Soll_0 (Heizkurve)").class(D::Temperature).unit("°C").icon("mdi:thermometer-lines"),
    C::sensor("HKR RLT Soll_oHG (Heizkurve)").class(D::Temperature).unit("°C").icon("mdi:thermometer-lines"),
    C::sensor("HKR RLT Soll_uHG (Heizkurve)").class(D::Temperature).unit("°C").icon("mdi:thermometer-lines"),
    C::sensor("HKR Soll_Raum").class(D::Temperature).unit("°C").icon("mdi:home-thermometer-outline"),
    C::sensor("HKR_Sollwert").class(D::Temperature).unit("°C").icon("mdi:home-thermometer-outline"),
    C::sensor("Hochdruck (bar)").class(D::Pressure).unit("bar").icon("mdi:gauge"),
    C::sensor("Niederdruck (bar)").class(D::Pressure).unit("bar").icon("mdi:gauge"),
    C::binary("Puffer Type"),
    C::binary("Stoerung").class(D::Problem).icon("mdi:alert"),
    C::sensor("Temp. Aussen").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Aussen verzoegert").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Brauchwasser").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. EQ_Austritt").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. EQ_Eintritt").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Frischwasser_Istwert").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Heissgas").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Kondensation").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Ruecklauf").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Sauggas").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Verdampfung").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::sensor("Temp. Vorlauf").class(D::Temperature).unit("°C").icon("mdi:thermometer"),
    C::binary("Verdichter").class(D::Running).icon("mdi:pump"),
    C::sensor("Verdichter Einschaltverz.(sec)").class(D::Duration).unit("s").icon("mdi:timer-lock-outline"),
    C::sensor("Verdichter laeuft seit").class(D::Duration).unit("h").icon("mdi:wrench-clock"),
    C::sensor("Verdichter_Status"),
    C::sensor("Verdichteranforderung"),
    C::binary("Warmwasservorrang").class(D::Running).icon("mdi:priority-high"),
    C::sensor("WP_System"),
    C::sensor("WW Hysterese Minimaltemp.").class(D::Temperature).unit("°C").icon("mdi:thermometer-water"),
    C::sensor("WW Hysterese Normaltemp.").class(D::Temperature).unit("°C").icon("mdi:thermometer-water"),
    C::sensor("WW Minimaltemp.").class(D::Temperature).unit("°C").icon("mdi:thermometer-water"),
    C::sensor("WW Normaltemp.").class(D::Temperature).unit("°C").icon("mdi:thermometer-water"),
    C::sensor("WW Type"),
    C::binary("Zirkulationspumpe WW").class(D::Running).icon("mdi:pump"),
];

/// Device metadata block in discovery payloads.
#[derive(Debug, Serialize)]
struct DeviceBlock<'a> {
    identifiers: [&'a str; 1],
    manufacturer: &'a str,
    model: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sw_version: Option<&'a str>,
}

/// One discovery configuration payload.
#[derive(Debug, Serialize)]
struct DiscoveryPayload<'a> {
    name: &'a str,
    state_topic: &'a str,
    value_template: String,
    unique_id: String,
    availability_topic: &'a str,
    qos: u8,
    device: DeviceBlock<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_display_precision: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
}

/// The channel catalog bound to one device identity and topic root.
pub struct ChannelCatalog {
    identity: DeviceIdentity,
    node_id: String,
    state_topic: String,
    values_topic: String,
    discovery_prefix: String,
    qos: u8,
}

impl ChannelCatalog {
    pub fn new(
        identity: DeviceIdentity,
        topic_root: &str,
        discovery_prefix: &str,
        qos: u8,
    ) -> Self {
        Self {
            identity,
            // Discovery topic segments must not contain '/'.
            node_id: topic_root.replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
            state_topic: format!("{}/state", topic_root),
            values_topic: format!("{}/values", topic_root),
            discovery_prefix: discovery_prefix.to_string(),
            qos,
        }
    }

    /// The fixed descriptor sequence.
    pub fn descriptors(&self) -> &'static [ChannelDescriptor] {
        CHANNELS
    }

    /// Render all discovery messages as (topic, payload) pairs, in catalog
    /// order. Pure: calling twice yields identical topics and identifiers.
    pub fn config_messages(&self) -> Vec<(String, String)> {
        CHANNELS
            .iter()
            .map(|channel| {
                let slug = channel.slug();
                let topic = format!(
                    "{}/{}/{}/{}/config",
                    self.discovery_prefix,
                    channel.kind.component(),
                    self.node_id,
                    slug
                );

                let device_id = self
                    .identity
                    .serial_number
                    .as_deref()
                    .unwrap_or(&self.node_id);

                let payload = DiscoveryPayload {
                    name: channel.name,
                    state_topic: &self.values_topic,
                    value_template: format!("{{{{ value_json.{} }}}}", slug),
                    unique_id: format!("{}_{}", self.node_id, slug),
                    availability_topic: &self.state_topic,
                    qos: self.qos,
                    device: DeviceBlock {
                        identifiers: [device_id],
                        manufacturer: &self.identity.manufacturer,
                        model: &self.identity.model,
                        name: &self.identity.name,
                        sw_version: self.identity.sw_version.as_deref(),
                    },
                    device_class: channel.device_class.map(|c| c.as_str()),
                    unit_of_measurement: channel.unit,
                    suggested_display_precision: channel.precision,
                    icon: channel.icon,
                };

                // Serialization of this payload shape cannot fail.
                let json = serde_json::to_string(&payload).unwrap_or_default();
                (topic, json)
            })
            .collect()
    }
}

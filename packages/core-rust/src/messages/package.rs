//! The `Package` envelope exchanged between named actors.
//!
//! A [`Package`] is immutable once built: fields are private and only exposed
//! through borrowing accessors. The untyped wire form is [`RawPackage`], whose
//! `package_type` is a plain string; converting it into a `Package` is the
//! single place where the request/response invariant is enforced for inbound
//! data.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::PackageError;
use crate::types::Value;

/// Wall-clock milliseconds since the Unix epoch, or 0 if the clock is unusable.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// PackageType
// ---------------------------------------------------------------------------

/// Discriminant of a package. No other kinds exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    Request,
    Response,
}

impl PackageType {
    /// Wire tag of this type (`"request"` / `"response"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            other => Err(PackageError::InvalidPackageType(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque application payload of a package.
///
/// `Empty` is the documented "no value" and must be read as "unknown", not as
/// a legitimate empty payload. Error replies wrap the offending package as
/// `Payload::Package`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Payload {
    #[default]
    Empty,
    Value(Value),
    Package(Box<Package>),
}

impl Payload {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_package(&self) -> Option<&Package> {
        match self {
            Self::Package(p) => Some(p),
            _ => None,
        }
    }

    /// Flattens the payload into a [`Value`]; wrapped packages become maps.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Value(v) => v.clone(),
            Self::Package(p) => RawPackage::from(p.as_ref().clone()).to_value(),
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<Package> for Payload {
    fn from(p: Package) -> Self {
        Self::Package(Box::new(p))
    }
}

impl TryFrom<Payload> for Package {
    type Error = Payload;

    /// Unwraps a `Payload::Package`; anything else is handed back unchanged.
    fn try_from(payload: Payload) -> Result<Self, Self::Error> {
        match payload {
            Payload::Package(p) => Ok(*p),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

/// Immutable message envelope.
///
/// Build one with [`Package::new`] when the type comes from untrusted text,
/// or with [`Package::request`] / [`Package::response`] when it is known.
/// `with_status` and `with_payload` consume the package and return a new one,
/// so a package that has been shared can no longer change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPackage", into = "RawPackage")]
pub struct Package {
    created: u64,
    sender: String,
    recipient: String,
    package_type: PackageType,
    correlation_id: String,
    subject: String,
    status_code: u16,
    payload: Payload,
}

impl Package {
    /// Builds a package from a textual type tag.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageType`] unless `package_type` is
    /// `"request"` or `"response"`.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        package_type: &str,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Self, PackageError> {
        let package_type = package_type.parse::<PackageType>()?;
        Ok(Self::with_type(
            sender,
            recipient,
            package_type,
            correlation_id,
            subject,
        ))
    }

    /// Builds a package of a known type with status 0 and an empty payload.
    #[must_use]
    pub fn with_type(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        package_type: PackageType,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            created: now_millis(),
            sender: sender.into(),
            recipient: recipient.into(),
            package_type,
            correlation_id: correlation_id.into(),
            subject: subject.into(),
            status_code: 0,
            payload: Payload::Empty,
        }
    }

    #[must_use]
    pub fn request(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self::with_type(
            sender,
            recipient,
            PackageType::Request,
            correlation_id,
            subject,
        )
    }

    #[must_use]
    pub fn response(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self::with_type(
            sender,
            recipient,
            PackageType::Response,
            correlation_id,
            subject,
        )
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Builds a Response addressed back to this package's sender, carrying
    /// the same correlation id.
    #[must_use]
    pub fn reply(
        &self,
        sender: impl Into<String>,
        subject: impl Into<String>,
        status_code: u16,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::response(sender, self.sender.clone(), self.correlation_id.clone(), subject)
            .with_status(status_code)
            .with_payload(payload)
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        self.package_type == PackageType::Request
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.package_type == PackageType::Response
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the package and returns its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Encodes the package as named-field `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Encode`] if serialization fails.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, PackageError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decodes a package from `MsgPack`, enforcing the type invariant.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Decode`] for malformed bytes and
    /// [`PackageError::InvalidPackageType`] for an unknown type tag.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, PackageError> {
        Self::try_from(RawPackage::from_msgpack(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// RawPackage (wire form)
// ---------------------------------------------------------------------------

/// Untyped wire representation of a package.
///
/// Every field is plain data so that frames from foreign peers can be decoded
/// (and answered) even when their type tag is not one we accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPackage {
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(rename = "type")]
    pub package_type: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub payload: Payload,
}

impl RawPackage {
    /// Converts into a typed [`Package`], handing `self` back if the type tag
    /// is not accepted.
    ///
    /// # Errors
    ///
    /// Returns the unchanged frame when its `package_type` is invalid.
    pub fn into_package(self) -> Result<Package, Box<RawPackage>> {
        let Ok(package_type) = self.package_type.parse::<PackageType>() else {
            return Err(Box::new(self));
        };
        Ok(Package {
            created: self.created,
            sender: self.sender,
            recipient: self.recipient,
            package_type,
            correlation_id: self.correlation_id,
            subject: self.subject,
            status_code: self.status_code,
            payload: self.payload,
        })
    }

    /// Decodes a raw frame from `MsgPack` without checking the type tag.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Decode`] for malformed bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, PackageError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Renders the frame as a [`Value::Map`] with camelCase keys.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(
            "created".to_string(),
            Value::Int(i64::try_from(self.created).unwrap_or(i64::MAX)),
        );
        map.insert("sender".to_string(), Value::from(self.sender.as_str()));
        map.insert("recipient".to_string(), Value::from(self.recipient.as_str()));
        map.insert("type".to_string(), Value::from(self.package_type.as_str()));
        map.insert(
            "correlationId".to_string(),
            Value::from(self.correlation_id.as_str()),
        );
        map.insert("subject".to_string(), Value::from(self.subject.as_str()));
        map.insert(
            "statusCode".to_string(),
            Value::Int(i64::from(self.status_code)),
        );
        map.insert("payload".to_string(), self.payload.to_value());
        Value::Map(map)
    }
}

impl From<Package> for RawPackage {
    fn from(p: Package) -> Self {
        Self {
            created: p.created,
            sender: p.sender,
            recipient: p.recipient,
            package_type: p.package_type.as_str().to_owned(),
            correlation_id: p.correlation_id,
            subject: p.subject,
            status_code: p.status_code,
            payload: p.payload,
        }
    }
}

impl TryFrom<RawPackage> for Package {
    type Error = PackageError;

    fn try_from(raw: RawPackage) -> Result<Self, Self::Error> {
        raw.into_package()
            .map_err(|raw| PackageError::InvalidPackageType(raw.package_type))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::fmt::{Debug, Write};
use std::path::PathBuf;
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// The run could not start because the execution environment is unsuitable.
/// This is a user attributable error as it relates to the machine diskprov is
/// running on.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEnvironmentMisconfigurationError {
    #[error("Provisioning requires root privileges")]
    MissingRequiredPermissions,
    #[error("Required binary '{binary}' is missing")]
    MissingBinary { binary: &'static str },
    #[error("Required binary '{binary}' is missing and no package manager is known for this host")]
    NoPackageManager { binary: &'static str },
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load configuration file from '{path}'")]
    LoadConfigFile { path: String },
    #[error("Failed to parse configuration file '{path}'")]
    ParseConfigFile { path: String },
    #[error("No disks were specified")]
    NoDisks,
    #[error("Disk '{disk}' was specified more than once")]
    DuplicateDisk { disk: PathBuf },
    #[error("'{name}' is not a valid array device name")]
    InvalidArrayDeviceName { name: String },
    #[error("Mount root '{root}' must be an absolute path")]
    RelativeRoot { root: PathBuf },
}

/// The host is in a state that makes provisioning unsafe. Reported before any
/// destructive action is taken.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PreconditionError {
    #[error("Disk '{disk}' does not exist")]
    DiskNotFound { disk: PathBuf },
    #[error("'{disk}' is not a block device")]
    NotABlockDevice { disk: PathBuf },
    #[error("Disk '{disk}' is already in use: {reason}")]
    DiskInUse { disk: PathBuf, reason: String },
    #[error("'{path}' is already a mount point")]
    AlreadyMounted { path: PathBuf },
    #[error("Mount unit '{path}' already exists")]
    MountUnitExists { path: PathBuf },
    #[error("Array device '{device}' is already in use (state '{state}')")]
    ArrayDeviceUnavailable { device: PathBuf, state: String },
    #[error("No free array device name among {candidates} candidates")]
    ArrayDevicesExhausted { candidates: usize },
    #[error("Existing file '{path}' conflicts with the artifact to be written")]
    ConflictingArtifact { path: PathBuf },
}

/// An external step of the provisioning pipeline failed. Nothing is rolled
/// back; the host has to be inspected by an operator.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningError {
    #[error("Failed to inspect '{disk}'")]
    InspectDisk { disk: PathBuf },
    #[error("Failed to query the state of array device '{device}'")]
    QueryArrayState { device: PathBuf },
    #[error("Failed to determine whether '{path}' is a mount point")]
    QueryMountPoint { path: PathBuf },
    #[error("Failed to escape unit name for '{path}'")]
    EscapeUnitName { path: PathBuf },
    #[error("Failed to install package '{package}'")]
    InstallPackage { package: String },
    #[error("Failed to discard blocks on '{disk}'")]
    Discard { disk: PathBuf },
    #[error("Failed to wait for device events to settle")]
    SettleDevices,
    #[error("Failed to create array '{device}'")]
    CreateArray { device: PathBuf },
    #[error("Failed to create filesystem on '{device}'")]
    CreateFilesystem { device: PathBuf },
    #[error("Failed to scan array configuration")]
    ScanArrays,
    #[error("Failed to read filesystem UUID of '{device}'")]
    FilesystemUuid { device: PathBuf },
    #[error("Failed to write '{path}'")]
    WriteArtifact { path: PathBuf },
    #[error("Failed to reload service manager configuration")]
    ReloadUnits,
    #[error("Failed to start unit '{unit}'")]
    StartUnit { unit: String },
    #[error("Failed to enable unit '{unit}'")]
    EnableUnit { unit: String },
    #[error("Failed to resolve account '{name}'")]
    ResolveAccount { name: String },
    #[error("Failed to create directory '{path}'")]
    CreateDirectory { path: PathBuf },
    #[error("Failed to change ownership of '{path}'")]
    ChangeOwnership { path: PathBuf },
    #[error("Failed to refresh boot image")]
    RefreshBootImage,
    #[error("Failed to detect OS family")]
    DetectOsFamily,
    #[error("Failed to execute '{binary}'")]
    CommandCouldNotExecute { binary: &'static str },
    #[error("'{binary}' failed: {explanation}")]
    CommandFailed {
        binary: &'static str,
        explanation: String,
    },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Failed to serialize the provisioning plan")]
    SerializePlan,
    #[error("diskprov panicked: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The categories tell an operator whether to fix the command line, the host,
/// or investigate a failed external step.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The execution environment is misconfigured.
    #[error(transparent)]
    ExecutionEnvironmentMisconfiguration(#[from] ExecutionEnvironmentMisconfigurationError),

    /// Invalid user input.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// A pre-flight check refused to let the run continue.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// An external step failed.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// A bug in diskprov.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct ProvisionErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct ProvisionError(Box<ProvisionErrorInner>);

impl ProvisionError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        ProvisionError(Box::new(ProvisionErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        ProvisionError(Box::new(ProvisionErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(msg: &'static str) -> Self {
        Self::new(InternalError::Internal(msg))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured ProvisionError.
    fn structured(self, kind: K) -> Result<T, ProvisionError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ProvisionError> {
        match self {
            Some(t) => Ok(t),
            None => Err(ProvisionError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ProvisionError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(ProvisionError::with_source(kind, e.into())),
        }
    }
}

pub trait ProvisionResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, ProvisionError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> ProvisionResultExt<T> for Result<T, ProvisionError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, ProvisionError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for ProvisionError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("provision-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::ExecutionEnvironmentMisconfiguration(ref e) => {
                state.serialize_field("error", e)?
            }
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Precondition(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Provisioning(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = ProvisionError(Box::new(ProvisionErrorInner {
            kind: ErrorKind::ExecutionEnvironmentMisconfiguration(
                ExecutionEnvironmentMisconfigurationError::MissingRequiredPermissions,
            ),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert_eq!(
                    m["error"],
                    Value::String("missing-required-permissions".into())
                );
                assert_eq!(
                    m["category"],
                    Value::String("execution-environment-misconfiguration".into())
                );
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(
                    m["message"],
                    Value::String("Provisioning requires root privileges".into())
                );
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_error_message_context() {
        let error = Err::<(), _>(ProvisionError::new(PreconditionError::NotABlockDevice {
            disk: "/dev/null".into(),
        }))
        .message("Disk validation failed")
        .unwrap_err();
        let rendered = format!("{error:?}");
        assert!(rendered.starts_with("'/dev/null' is not a block device at "));
        assert!(rendered.contains("Context:\n    0: Disk validation failed at "));
        assert!(matches!(
            error.kind(),
            ErrorKind::Precondition(PreconditionError::NotABlockDevice { .. })
        ));
    }

    #[test]
    fn test_option_structured() {
        let error = None::<u32>
            .structured(InvalidInputError::NoDisks)
            .unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::InvalidInput(InvalidInputError::NoDisks));
        assert_eq!(Some(3).structured(InvalidInputError::NoDisks).unwrap(), 3);
    }
}

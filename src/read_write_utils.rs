//! Reading & writing serialized values to files.
//!
//! JSON is used for anything meant to be exchanged between parties (receipts),
//! [bincode] for compact binary storage.

use log::debug;
use serde::{de::DeserializeOwned, Serialize};

use std::{
    ffi::OsString,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

/// Serialize `value` to a json file at `path`.
///
/// The file is created, or truncated if it already exists.
pub fn serialize_to_json_file<T: Serialize>(value: &T, path: PathBuf) -> Result<(), ReadWriteError> {
    debug!("Serializing to json file {:?}", path.as_os_str());

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;

    Ok(())
}

/// Deserialize a json file at `path`.
pub fn deserialize_from_json_file<T: DeserializeOwned>(path: PathBuf) -> Result<T, ReadWriteError> {
    debug!("Deserializing from json file {:?}", path.as_os_str());

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Serialize `value` to a binary file at `path` using [bincode].
pub fn serialize_to_bin_file<T: Serialize>(value: &T, path: PathBuf) -> Result<(), ReadWriteError> {
    debug!("Serializing to binary file {:?}", path.as_os_str());

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, value)?;

    Ok(())
}

/// Deserialize a [bincode] file at `path`.
pub fn deserialize_from_bin_file<T: DeserializeOwned>(path: PathBuf) -> Result<T, ReadWriteError> {
    debug!("Deserializing from binary file {:?}", path.as_os_str());

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(bincode::deserialize_from(reader)?)
}

/// File formats supported for receipts and other exchanged artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Binary,
}

/// Determine the [FileFormat] from the extension of `path`.
///
/// `.json` maps to [FileFormat::Json] and `binary_extension` to
/// [FileFormat::Binary]; anything else is an error.
pub fn file_format(path: &Path, binary_extension: &str) -> Result<FileFormat, ReadWriteError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ReadWriteError::UnknownFileType(path.as_os_str().to_os_string()))?;

    match ext {
        "json" => Ok(FileFormat::Json),
        e if e == binary_extension => Ok(FileFormat::Binary),
        e => Err(ReadWriteError::UnsupportedFileExtension {
            expected: format!("json or {}", binary_extension),
            actual: e.to_owned(),
        }),
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

#[derive(thiserror::Error, Debug)]
pub enum ReadWriteError {
    #[error("Problem reading or writing the file")]
    FileError(#[from] std::io::Error),
    #[error("Problem serializing/deserializing with serde_json")]
    JsonError(#[from] serde_json::Error),
    #[error("Problem serializing/deserializing with bincode")]
    BincodeError(#[from] bincode::Error),
    #[error("Unable to find file extension for path {0:?}")]
    UnknownFileType(OsString),
    #[error("Expected file extension {expected:?} but got {actual:?}")]
    UnsupportedFileExtension { expected: String, actual: String },
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

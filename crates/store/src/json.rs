// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON TEXT-column codecs shared by the repositories.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::StoreError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

pub(crate) fn decode_opt<T: DeserializeOwned>(
    column: &str,
    raw: Option<&str>,
) -> Result<Option<T>, StoreError> {
    raw.map(|r| decode(column, r)).transpose()
}

//! Import and export of stored items.
//!
//! JSON exports wrap items in `{ version, exportDate, items, encrypted }`.
//! When `encrypted` is true every item's `fields` is an [`EncryptedEnvelope`].
//! CSV exports carry the field map as a quoted JSON blob and are never
//! encrypted.
//!
//! Imports are not atomic: each item is validated on its own and failures
//! are collected in [`ImportResult`] without aborting the batch.

use chrono::{DateTime, SecondsFormat, Utc};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::codec::ObjectCodec;
use crate::item::{Fields, ItemType, StorageItem};
use crate::session::VaultSession;
use lots_common::{Error, ItemId, Result};
use lots_crypto::EncryptedEnvelope;

/// Export format version written to JSON exports.
pub const EXPORT_VERSION: &str = "1.0";

/// Required CSV columns.
pub const CSV_HEADERS: [&str; 6] = ["Type", "Title", "Tags", "Created", "Updated", "Fields"];

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    /// True when at least one item was imported.
    pub success: bool,
    pub imported: usize,
    pub failed: usize,
    /// One human readable message per rejected item or document error.
    pub errors: Vec<String>,
    /// The items that passed validation.
    #[serde(skip)]
    pub items: Vec<StorageItem>,
}

impl ImportResult {
    fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(error = %message, "Import rejected");
        Self {
            errors: vec![message],
            ..Self::default()
        }
    }

    fn accept(&mut self, item: StorageItem) {
        self.imported += 1;
        self.items.push(item);
    }

    fn reject(&mut self, message: String) {
        warn!(error = %message, "Import item rejected");
        self.failed += 1;
        self.errors.push(message);
    }

    fn finish(mut self) -> Self {
        self.success = self.imported > 0;
        info!(imported = self.imported, failed = self.failed, "Import finished");
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<T> {
    version: &'static str,
    export_date: String,
    items: Vec<T>,
    encrypted: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SealedItem<'a> {
    id: &'a ItemId,
    item_type: ItemType,
    title: &'a str,
    fields: EncryptedEnvelope,
    tags: &'a [String],
    created_at: i64,
    updated_at: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExport {
    #[allow(dead_code)]
    version: String,
    #[allow(dead_code)]
    export_date: String,
    items: Vec<Value>,
    encrypted: bool,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Export items as pretty-printed JSON.
///
/// With `encrypt_with` set, each item's fields are sealed with that session.
///
/// # Errors
/// - `VaultLocked` if `encrypt_with` is a locked session
pub fn export_json(items: &[StorageItem], encrypt_with: Option<&VaultSession>) -> Result<String> {
    let json = match encrypt_with {
        Some(session) => {
            let codec = ObjectCodec::new(session)?;
            let sealed = items
                .iter()
                .map(|item| {
                    Ok(SealedItem {
                        id: &item.id,
                        item_type: item.item_type,
                        title: &item.title,
                        fields: codec.seal_fields(item)?,
                        tags: &item.tags,
                        created_at: item.created_at,
                        updated_at: item.updated_at,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            serde_json::to_string_pretty(&ExportDocument {
                version: EXPORT_VERSION,
                export_date: now_iso(),
                items: sealed,
                encrypted: true,
            })?
        }
        None => serde_json::to_string_pretty(&ExportDocument {
            version: EXPORT_VERSION,
            export_date: now_iso(),
            items: items.iter().collect(),
            encrypted: false,
        })?,
    };

    info!(count = items.len(), encrypted = encrypt_with.is_some(), "Exported items to JSON");
    Ok(json)
}

/// Import a JSON export.
///
/// # Errors
/// - `VaultLocked` if the export is encrypted and no unlocked session is given
///
/// Every other problem is reported inside the returned [`ImportResult`].
pub fn import_json(data: &str, session: Option<&VaultSession>) -> Result<ImportResult> {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => return Ok(ImportResult::rejected(format!("Failed to parse JSON: {}", e))),
    };
    let export: RawExport = match serde_json::from_value(value) {
        Ok(export) => export,
        Err(e) => {
            return Ok(ImportResult::rejected(format!(
                "Invalid export data format: {}",
                e
            )))
        }
    };

    let codec = if export.encrypted {
        Some(ObjectCodec::new(session.ok_or(Error::VaultLocked)?)?)
    } else {
        None
    };

    let mut result = ImportResult::default();
    for (index, mut raw) in export.items.into_iter().enumerate() {
        let label = item_label(&raw, index);

        if let Some(codec) = &codec {
            if let Err(e) = open_sealed_fields(codec, &mut raw) {
                result.reject(format!("Failed to import {}: {}", label, e));
                continue;
            }
        }

        match parse_item(&raw) {
            Ok(item) => result.accept(item),
            Err(reason) => result.reject(format!("Invalid item {}: {}", label, reason)),
        }
    }

    Ok(result.finish())
}

fn item_label(raw: &Value, index: usize) -> String {
    match raw.get("title").and_then(Value::as_str) {
        Some(title) => format!("'{}'", title),
        None => format!("#{}", index + 1),
    }
}

fn open_sealed_fields(codec: &ObjectCodec<'_>, raw: &mut Value) -> Result<()> {
    let object = raw
        .as_object_mut()
        .ok_or_else(|| Error::InvalidInput("item is not an object".to_string()))?;
    let sealed = object
        .get("fields")
        .cloned()
        .ok_or_else(|| Error::InvalidInput("missing `fields`".to_string()))?;
    let envelope: EncryptedEnvelope = serde_json::from_value(sealed)
        .map_err(|e| Error::Serialization(format!("`fields` is not an envelope: {}", e)))?;
    let fields: Fields = codec.open_fields(&envelope)?;
    object.insert("fields".to_string(), serde_json::to_value(fields)?);
    Ok(())
}

fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> std::result::Result<&'a str, String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing or invalid `{}`", key))
}

fn timestamp_field(object: &Map<String, Value>, key: &str) -> std::result::Result<i64, String> {
    object
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("missing or invalid `{}`", key))
}

fn parse_item(raw: &Value) -> std::result::Result<StorageItem, String> {
    let object = raw.as_object().ok_or("item is not an object")?;

    let id = ItemId::new(string_field(object, "id")?).map_err(|_| "empty `id`".to_string())?;
    let title = string_field(object, "title")?.to_string();
    let item_type = string_field(object, "itemType")?
        .parse::<ItemType>()
        .map_err(|e| e.to_string())?;

    let tags = object
        .get("tags")
        .and_then(Value::as_array)
        .ok_or("missing or invalid `tags`")?
        .iter()
        .map(|tag| tag.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or("`tags` must contain only strings")?;

    let created_at = timestamp_field(object, "createdAt")?;
    let updated_at = timestamp_field(object, "updatedAt")?;

    let fields = object
        .get("fields")
        .and_then(Value::as_object)
        .ok_or("missing or invalid `fields`")?
        .iter()
        .map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
        .collect::<Option<Fields>>()
        .ok_or("`fields` values must be strings")?;

    Ok(StorageItem {
        id,
        item_type,
        title,
        fields,
        tags,
        created_at,
        updated_at,
    })
}

fn csv_error(e: impl std::fmt::Display) -> Error {
    Error::Serialization(format!("CSV error: {}", e))
}

fn millis_to_iso(millis: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| Error::InvalidInput(format!("Timestamp out of range: {}", millis)))
}

fn iso_to_millis(value: &str) -> std::result::Result<i64, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("invalid date '{}': {}", value, e))
}

/// Export items as CSV with columns `Type,Title,Tags,Created,Updated,Fields`.
///
/// Every value is quoted. Field values are written in plaintext.
pub fn export_csv(items: &[StorageItem]) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADERS).map_err(csv_error)?;

    for item in items {
        let fields_json = serde_json::to_string(&item.fields)?;
        writer
            .write_record([
                item.item_type.as_str().to_string(),
                item.title.clone(),
                item.tags.join(";"),
                millis_to_iso(item.created_at)?,
                millis_to_iso(item.updated_at)?,
                fields_json,
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer.into_inner().map_err(csv_error)?;
    let csv = String::from_utf8(bytes).map_err(csv_error)?;

    info!(count = items.len(), "Exported items to CSV");
    Ok(csv)
}

fn parse_csv_item(headers: &[String], record: &StringRecord) -> std::result::Result<StorageItem, String> {
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| record.get(i))
            .ok_or_else(|| format!("missing column `{}`", name))
    };

    let item_type = column("Type")?
        .parse::<ItemType>()
        .map_err(|e| e.to_string())?;
    let title = column("Title")?.to_string();
    let tags = column("Tags")?
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let created_at = iso_to_millis(column("Created")?)?;
    let updated_at = iso_to_millis(column("Updated")?)?;

    let raw_fields = column("Fields")?;
    let fields: Fields = if raw_fields.trim().is_empty() {
        Fields::new()
    } else {
        serde_json::from_str(raw_fields).map_err(|e| format!("invalid Fields JSON: {}", e))?
    };

    Ok(StorageItem {
        id: ItemId::generate(),
        item_type,
        title,
        fields,
        tags,
        created_at,
        updated_at,
    })
}

/// Import a CSV export. Each item gets a fresh id.
///
/// Rows may have fewer or more columns than the header; a row that cannot
/// be turned into an item is reported with its line number.
pub fn import_csv(data: &str) -> ImportResult {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(record) if !record.is_empty() => record.iter().map(|h| h.trim().to_string()).collect(),
        Ok(_) => return ImportResult::rejected("Invalid CSV format: missing header row"),
        Err(e) => return ImportResult::rejected(format!("Invalid CSV format: {}", e)),
    };
    if !CSV_HEADERS
        .iter()
        .all(|required| headers.iter().any(|h| h == required))
    {
        return ImportResult::rejected("Invalid CSV format");
    }

    let mut result = ImportResult::default();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                if record.iter().all(|v| v.trim().is_empty()) {
                    continue;
                }
                let line = record.position().map_or(0, |p| p.line());
                match parse_csv_item(&headers, &record) {
                    Ok(item) => result.accept(item),
                    Err(reason) => {
                        result.reject(format!("Failed to parse line {}: {}", line, reason))
                    }
                }
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                result.reject(format!("Failed to parse line {}: {}", line, e));
                if e.is_io_error() {
                    break;
                }
            }
        }
    }

    result.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lots_crypto::{KdfParams, Salt};
    use proptest::prelude::*;
    use serde_json::json;

    fn session() -> VaultSession {
        let mut session = VaultSession::new();
        session
            .unlock_with("transfer-password", &Salt::generate(), KdfParams::new(1_000).unwrap())
            .unwrap();
        session
    }

    fn items() -> Vec<StorageItem> {
        vec![
            StorageItem::builder(ItemType::Login, "Mail, personal")
                .field("username", "alice")
                .field("password", "p\"w,1")
                .tag("mail")
                .tag("home")
                .created_at(1_700_000_000_123)
                .build()
                .unwrap(),
            StorageItem::builder(ItemType::SecureNote, "Recovery")
                .field("note", "line one\nline two")
                .created_at(1_600_000_000_000)
                .build()
                .unwrap(),
        ]
    }

    fn raw_item(id: &str, title: Option<&str>) -> Value {
        let mut item = json!({
            "id": id,
            "itemType": "Login",
            "fields": {"username": "bob"},
            "tags": [],
            "createdAt": 1_700_000_000_000i64,
            "updatedAt": 1_700_000_000_000i64,
        });
        if let Some(title) = title {
            item["title"] = json!(title);
        }
        item
    }

    #[test]
    fn test_plain_import_collects_failures() {
        let doc = json!({
            "version": "1.0",
            "exportDate": "2024-01-01T00:00:00.000Z",
            "encrypted": false,
            "items": [
                raw_item("1", Some("First")),
                raw_item("2", None),
                raw_item("3", Some("Third")),
            ],
        });

        let result = import_json(&doc.to_string(), None).unwrap();
        assert!(result.success);
        assert_eq!(result.imported, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("#2"));
        assert_eq!(result.items[1].title, "Third");
    }

    #[test]
    fn test_plain_export_roundtrip() {
        let original = items();
        let json = export_json(&original, None).unwrap();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], EXPORT_VERSION);
        assert_eq!(value["encrypted"], false);
        assert_eq!(value["items"][0]["fields"]["username"], "alice");

        let result = import_json(&json, None).unwrap();
        assert_eq!(result.failed, 0);
        assert_eq!(result.items, original);
    }

    #[test]
    fn test_encrypted_export_roundtrip() {
        let session = session();
        let original = items();
        let json = export_json(&original, Some(&session)).unwrap();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["encrypted"], true);
        assert!(value["items"][0]["fields"]["encryptedData"].is_string());
        assert!(!json.contains("alice"));

        let result = import_json(&json, Some(&session)).unwrap();
        assert!(result.success);
        assert_eq!(result.items, original);
    }

    #[test]
    fn test_encrypted_export_requires_unlocked_session() {
        let locked = VaultSession::new();
        assert!(matches!(
            export_json(&items(), Some(&locked)),
            Err(Error::VaultLocked)
        ));
    }

    #[test]
    fn test_encrypted_import_without_session() {
        let session = session();
        let json = export_json(&items(), Some(&session)).unwrap();

        assert!(matches!(import_json(&json, None), Err(Error::VaultLocked)));
        let locked = VaultSession::new();
        assert!(matches!(
            import_json(&json, Some(&locked)),
            Err(Error::VaultLocked)
        ));
    }

    #[test]
    fn test_encrypted_import_wrong_key_fails_per_item() {
        let json = export_json(&items(), Some(&session())).unwrap();
        let result = import_json(&json, Some(&session())).unwrap();

        assert!(!result.success);
        assert_eq!(result.imported, 0);
        assert_eq!(result.failed, 2);
        assert!(result.errors[0].starts_with("Failed to import 'Mail, personal'"));
    }

    #[test]
    fn test_document_errors() {
        let result = import_json("{not json", None).unwrap();
        assert!(!result.success);
        assert!(result.errors[0].starts_with("Failed to parse JSON"));

        let result = import_json(r#"{"version":"1.0","items":[]}"#, None).unwrap();
        assert!(!result.success);
        assert_eq!(result.failed, 0);
        assert!(result.errors[0].starts_with("Invalid export data format"));
    }

    #[test]
    fn test_item_validation_reasons() {
        let mut bad_type = raw_item("1", Some("Bad type"));
        bad_type["itemType"] = json!("Password");
        let mut bad_time = raw_item("2", Some("Bad time"));
        bad_time["createdAt"] = json!("yesterday");
        let mut bad_fields = raw_item("3", Some("Bad fields"));
        bad_fields["fields"] = json!({"pin": 1234});

        let doc = json!({
            "version": "1.0",
            "exportDate": "2024-01-01T00:00:00.000Z",
            "encrypted": false,
            "items": [bad_type, bad_time, bad_fields, "not an item"],
        });

        let result = import_json(&doc.to_string(), None).unwrap();
        assert!(!result.success);
        assert_eq!(result.failed, 4);
        assert!(result.errors[0].contains("Unknown item type"));
        assert!(result.errors[1].contains("createdAt"));
        assert!(result.errors[2].contains("must be strings"));
        assert!(result.errors[3].contains("not an object"));
    }

    #[test]
    fn test_csv_export_format() {
        let csv = export_csv(&items()).unwrap();
        let first_row = csv.lines().nth(1).unwrap();

        assert!(csv.starts_with("\"Type\",\"Title\",\"Tags\",\"Created\",\"Updated\",\"Fields\"\n"));
        assert!(first_row.starts_with(
            "\"Login\",\"Mail, personal\",\"mail;home\",\"2023-11-14T22:13:20.123Z\",\"2023-11-14T22:13:20.123Z\","
        ));
        assert!(first_row.contains(r#""{""password"":""p\""w,1"","#));
    }

    #[test]
    fn test_csv_roundtrip() {
        let original = items();
        let csv = export_csv(&original).unwrap();
        let result = import_csv(&csv);

        assert!(result.success);
        assert_eq!(result.imported, 2);
        for (imported, source) in result.items.iter().zip(&original) {
            assert_ne!(imported.id, source.id);
            assert_eq!(imported.title, source.title);
            assert_eq!(imported.fields, source.fields);
            assert_eq!(imported.tags, source.tags);
            assert_eq!(imported.created_at, source.created_at);
        }
    }

    #[test]
    fn test_csv_bad_rows_do_not_abort() {
        let csv = "Type,Title,Tags,Created,Updated,Fields\n\
                   Login,\"Ok\",\"\",2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,\"{}\"\n\
                   Nope,\"Bad\",\"\",2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,\"{}\"\n\
                   Login,\"Bad date\",\"\",yesterday,2024-01-01T00:00:00.000Z,\"{}\"\n";
        let result = import_csv(csv);

        assert!(result.success);
        assert_eq!(result.imported, 1);
        assert_eq!(result.failed, 2);
        assert!(result.errors[0].starts_with("Failed to parse line 3"));
        assert!(result.errors[0].contains("Unknown item type"));
        assert!(result.errors[1].starts_with("Failed to parse line 4"));
        assert!(result.errors[1].contains("invalid date"));
    }

    #[test]
    fn test_csv_stray_quote_keeps_following_rows() {
        let csv = "Type,Title,Tags,Created,Updated,Fields\n\
                   Login,First,,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,{}\n\
                   SecureNote,Second,,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,{}\n\
                   Login,Bad\"Title,,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,{}\n\
                   Nope,Broken,,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,{}\n\
                   Login,Last,,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,{}\n";
        let result = import_csv(csv);

        assert_eq!(result.imported + result.failed, 5);
        assert_eq!(result.imported, 4);
        assert_eq!(result.failed, 1);
        let titles: Vec<&str> = result.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Bad\"Title", "Last"]);
        assert!(result.errors[0].starts_with("Failed to parse line 5"));
    }

    #[test]
    fn test_csv_blank_and_short_rows() {
        let csv = "Type,Title,Tags,Created,Updated,Fields\r\n\
                   \r\n\
                   Login,Ok,,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,{}\r\n\
                   ,,,,,\r\n\
                   Login,Short\r\n";
        let result = import_csv(csv);

        assert_eq!(result.imported, 1);
        assert_eq!(result.failed, 1);
        assert!(result.errors[0].contains("missing column `Tags`"));
    }

    #[test]
    fn test_csv_missing_headers() {
        let result = import_csv("Type,Title\nLogin,x");
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Invalid CSV format".to_string()]);

        let result = import_csv("");
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Invalid CSV format: missing header row".to_string()]);
    }

    proptest! {
        #[test]
        fn test_csv_values_survive_roundtrip(
            title in "[a-z,\"\n ;]{0,12}",
            values in proptest::collection::vec("[a-z,\"\n ;]{0,12}", 0..4)
        ) {
            let fields: Fields = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("f{}", i), v.clone()))
                .collect();
            let item = StorageItem {
                id: ItemId::generate(),
                item_type: ItemType::Login,
                title: title.clone(),
                fields: fields.clone(),
                tags: Vec::new(),
                created_at: 1_700_000_000_000,
                updated_at: 1_700_000_000_000,
            };

            let result = import_csv(&export_csv(&[item]).unwrap());
            prop_assert_eq!(result.failed, 0);
            prop_assert_eq!(result.items.len(), 1);
            prop_assert_eq!(&result.items[0].title, &title);
            prop_assert_eq!(&result.items[0].fields, &fields);
        }
    }
}

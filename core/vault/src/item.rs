//! Stored item model.
//!
//! Items are immutable values. Changes go through the `with_*` functions,
//! which return an updated copy and bump `updated_at`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use lots_common::{Error, ItemId, Result};

/// Field name to field value. Only ever persisted encrypted, except in
/// plaintext exports.
pub type Fields = BTreeMap<String, String>;

/// Kind of stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Login,
    CreditCard,
    BankAccount,
    Identity,
    CryptoWallet,
    SecureNote,
    Custom,
}

impl ItemType {
    pub const ALL: [ItemType; 7] = [
        ItemType::Login,
        ItemType::CreditCard,
        ItemType::BankAccount,
        ItemType::Identity,
        ItemType::CryptoWallet,
        ItemType::SecureNote,
        ItemType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Login => "Login",
            ItemType::CreditCard => "CreditCard",
            ItemType::BankAccount => "BankAccount",
            ItemType::Identity => "Identity",
            ItemType::CryptoWallet => "CryptoWallet",
            ItemType::SecureNote => "SecureNote",
            ItemType::Custom => "Custom",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == value.trim())
            .ok_or_else(|| Error::InvalidInput(format!("Unknown item type '{}'", value)))
    }
}

/// A stored secret: typed title, tags and a field map.
///
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageItem {
    pub id: ItemId,
    pub item_type: ItemType,
    pub title: String,
    pub fields: Fields,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StorageItem {
    /// Start building a new item.
    pub fn builder(item_type: ItemType, title: impl Into<String>) -> StorageItemBuilder {
        StorageItemBuilder {
            id: None,
            item_type,
            title: title.into(),
            fields: Fields::new(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    /// Look up a field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Copy with `name` set to `value`.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self.touched()
    }

    /// Copy without the field `name`.
    pub fn without_field(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self.touched()
    }

    /// Copy with a new title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.touched()
    }

    /// Copy with the tag list replaced.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self.touched()
    }

    /// Copy with the whole field map replaced.
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self.touched()
    }

    fn touched(mut self) -> Self {
        self.updated_at = Utc::now().timestamp_millis().max(self.updated_at);
        self
    }
}

/// Builder for [`StorageItem`].
#[derive(Debug, Clone)]
pub struct StorageItemBuilder {
    id: Option<ItemId>,
    item_type: ItemType,
    title: String,
    fields: Fields,
    tags: Vec<String>,
    created_at: Option<i64>,
}

impl StorageItemBuilder {
    pub fn id(mut self, id: ItemId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Fix the creation time (epoch millis) instead of using the clock.
    pub fn created_at(mut self, millis: i64) -> Self {
        self.created_at = Some(millis);
        self
    }

    /// Finish the item.
    ///
    /// # Errors
    /// - Returns error if the title is blank
    pub fn build(self) -> Result<StorageItem> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Item title cannot be empty".to_string()));
        }
        let created_at = self
            .created_at
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        Ok(StorageItem {
            id: self.id.unwrap_or_else(ItemId::generate),
            item_type: self.item_type,
            title: self.title,
            fields: self.fields,
            tags: self.tags,
            created_at,
            updated_at: created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login() -> StorageItem {
        StorageItem::builder(ItemType::Login, "Mail")
            .field("username", "alice")
            .field("password", "hunter2")
            .tag("work")
            .created_at(1_700_000_000_000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder() {
        let item = login();
        assert_eq!(item.item_type, ItemType::Login);
        assert_eq!(item.field("username"), Some("alice"));
        assert_eq!(item.tags, vec!["work".to_string()]);
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn test_blank_title_rejected() {
        assert!(StorageItem::builder(ItemType::SecureNote, "  ").build().is_err());
    }

    #[test]
    fn test_updates_return_new_values() {
        let original = login();
        let updated = original.clone().with_field("password", "correct horse");

        assert_eq!(original.field("password"), Some("hunter2"));
        assert_eq!(updated.field("password"), Some("correct horse"));
        assert!(updated.updated_at > original.updated_at);
        assert_eq!(updated.created_at, original.created_at);

        let trimmed = updated.without_field("username").with_title("Mail (old)");
        assert_eq!(trimmed.field("username"), None);
        assert_eq!(trimmed.title, "Mail (old)");
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(login()).unwrap();
        assert_eq!(value["itemType"], "Login");
        assert_eq!(value["createdAt"], 1_700_000_000_000i64);
        assert_eq!(value["fields"]["username"], "alice");
        assert!(value["id"].is_string());
    }

    #[test]
    fn test_item_type_parse() {
        for t in ItemType::ALL {
            assert_eq!(t.as_str().parse::<ItemType>().unwrap(), t);
        }
        assert!("Password".parse::<ItemType>().is_err());
    }
}

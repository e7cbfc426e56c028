//! Record types

use assetvault_storage::Key;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value stored in a well-known collection under its own key.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const COLLECTION: &'static str;

    fn key(&self) -> Key;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    ImageBitmap,
    ImageVector,
    Project,
    Sound,
    Sprite,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::ImageBitmap => "ImageBitmap",
            AssetType::ImageVector => "ImageVector",
            AssetType::Project => "Project",
            AssetType::Sound => "Sound",
            AssetType::Sprite => "Sprite",
        }
    }

    /// Format used when none is given
    pub fn default_format(&self) -> DataFormat {
        match self {
            AssetType::ImageBitmap => DataFormat::Png,
            AssetType::ImageVector => DataFormat::Svg,
            AssetType::Project | AssetType::Sprite => DataFormat::Json,
            AssetType::Sound => DataFormat::Wav,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Jpg,
    Json,
    Mp3,
    Png,
    Sb,
    Sb2,
    Sb3,
    Svg,
    Wav,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Jpg => "jpg",
            DataFormat::Json => "json",
            DataFormat::Mp3 => "mp3",
            DataFormat::Png => "png",
            DataFormat::Sb => "sb",
            DataFormat::Sb2 => "sb2",
            DataFormat::Sb3 => "sb3",
            DataFormat::Svg => "svg",
            DataFormat::Wav => "wav",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored asset. The store only looks at `asset_id`; `data` is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_type: AssetType,
    pub asset_id: String,
    pub data_format: DataFormat,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Asset {
    pub fn new(
        asset_type: AssetType,
        asset_id: impl Into<String>,
        data_format: DataFormat,
        data: Vec<u8>,
    ) -> Self {
        Self {
            asset_type,
            asset_id: asset_id.into(),
            data_format,
            data,
        }
    }
}

impl Record for Asset {
    const COLLECTION: &'static str = crate::schema::SOUND_RECORDINGS;

    fn key(&self) -> Key {
        Key::from(&self.asset_id)
    }
}

/// A named sound clip as the VM holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSound {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u32>,
}

impl VmSound {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            format: None,
            rate: None,
            sample_count: None,
        }
    }
}

impl Record for VmSound {
    const COLLECTION: &'static str = crate::schema::VM_SOUNDS;

    fn key(&self) -> Key {
        Key::from(&self.name)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

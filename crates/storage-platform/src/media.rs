use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Authority of the media library content provider
pub const MEDIA_AUTHORITY: &str = "media";

const VOLUME: &str = "external";

/// Media library table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaCollection {
    Images,
    Video,
    Audio,
    /// General-purpose files (documents, downloads, anything else)
    Files,
}

impl MediaCollection {
    pub const ALL: [MediaCollection; 4] = [
        MediaCollection::Images,
        MediaCollection::Video,
        MediaCollection::Audio,
        MediaCollection::Files,
    ];

    fn segment(self) -> &'static str {
        match self {
            MediaCollection::Images => "images",
            MediaCollection::Video => "video",
            MediaCollection::Audio => "audio",
            MediaCollection::Files => "file",
        }
    }

    /// Table URI, e.g. `content://media/external/images/media`
    pub fn content_uri(self) -> String {
        match self {
            MediaCollection::Files => {
                format!("content://{}/{}/{}", MEDIA_AUTHORITY, VOLUME, self.segment())
            }
            _ => format!("content://{}/{}/{}/media", MEDIA_AUTHORITY, VOLUME, self.segment()),
        }
    }

    /// Table whose content URI is exactly `uri`
    pub fn from_content_uri(uri: &str) -> Option<MediaCollection> {
        Self::ALL.into_iter().find(|c| c.content_uri() == uri)
    }

    pub fn record_uri(self, id: u64) -> String {
        format!("{}/{}", self.content_uri(), id)
    }

    /// Split a record URI into its table and row id
    pub fn parse_record_uri(uri: &str) -> Option<(MediaCollection, u64)> {
        let (table, id) = uri.rsplit_once('/')?;
        let id = id.parse().ok()?;
        Self::from_content_uri(table).map(|c| (c, id))
    }
}

/// Column values supplied when inserting a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaValues {
    pub display_name: String,
    pub mime_type: String,
    /// Directory hint relative to the volume root, e.g. `Pictures/MyApp/`
    pub relative_path: String,
}

/// A row of a media table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: u64,
    pub collection: MediaCollection,
    pub display_name: String,
    pub mime_type: String,
    pub relative_path: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub date_modified: u64,
}

/// Tabular media library: query, insert and delete by record URI
pub trait MediaStore: Send + Sync {
    fn query_record(&self, uri: &str) -> Result<Option<MediaRecord>>;

    /// Insert a new record, returning its URI, or `None` if the store refused the row
    fn insert_record(
        &self,
        collection: MediaCollection,
        values: &MediaValues,
    ) -> Result<Option<String>>;

    /// Delete by URI, returning the number of rows removed. A table URI
    /// matches every row of the table.
    fn delete_record(&self, uri: &str) -> Result<usize>;

    fn read_record(&self, uri: &str) -> Result<Vec<u8>>;

    fn write_record(&self, uri: &str, data: &[u8]) -> Result<()>;

    fn append_record(&self, uri: &str, data: &[u8]) -> Result<()>;
}

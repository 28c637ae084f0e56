//! Query results and pagination cursors.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dynastack_model::Document;

use crate::error::{OrmError, OrmResult};

/// Resume cursor: the key attributes of the last item a query processed.
#[derive(Debug, Clone, PartialEq)]
pub struct PageKey(Document);

impl PageKey {
    /// Borrows the key attributes.
    #[must_use]
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consumes the cursor, returning its key attributes.
    #[must_use]
    pub fn into_document(self) -> Document {
        self.0
    }

    /// Encodes the cursor as an opaque URL-safe token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPageToken` if the key cannot be serialized.
    pub fn to_token(&self) -> OrmResult<String> {
        let json = serde_json::to_vec(&self.0).map_err(|e| OrmError::InvalidPageToken(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodes a token produced by [`PageKey::to_token`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidPageToken` if the token is not valid base64 or does not
    /// hold a key document.
    pub fn from_token(token: &str) -> OrmResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| OrmError::InvalidPageToken(e.to_string()))?;
        let doc: Document =
            serde_json::from_slice(&json).map_err(|e| OrmError::InvalidPageToken(e.to_string()))?;
        if doc.is_empty() {
            return Err(OrmError::InvalidPageToken("empty key".to_owned()));
        }
        Ok(Self(doc))
    }
}

impl From<Document> for PageKey {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

/// One page of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<E> {
    /// Mapped items in store scan order.
    pub items: Vec<E>,
    /// Cursor for the next page, `None` once the query is exhausted.
    pub page_key: Option<PageKey>,
}

impl<E> QueryResult<E> {
    /// Returns `true` if more pages may follow.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.page_key.is_some()
    }
}

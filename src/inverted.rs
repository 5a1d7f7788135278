//! Inverted indexes and the primary-key index.
//!
//! Every index of a segment lives in `index/<name>/`: a sorted term
//! `dictionary` and a `posting` file of delta-encoded doc id lists. The
//! primary-key index keeps a sorted `(hash, doc id)` table in `index/<pk>/data`.

pub mod posting;
pub mod primary_key;
pub mod reader;
pub mod writer;

pub use posting::{Posting, PostingList, TermPostingIndex};
pub use primary_key::PrimaryKeyIndex;
pub use reader::InvertedIndexReader;
pub use writer::{InvertedIndexWriter, tokenize};

//! # dirdb codec
//!
//! Record packing for the dirdb directory database.
//!
//! A [`Record`] is a distinguished name plus a list of attribute
//! [`Element`]s whose values are opaque byte strings. Records travel
//! through the backing store as CBOR; the encoding is shape-fixed so
//! identical records always pack to identical bytes.
//!
//! ## Usage
//!
//! ```
//! use dirdb_codec::{decode_record, encode_record, Element, Record};
//!
//! let rec = Record::new("CN=Alice,O=X").with_element(Element::single("cn", "Alice"));
//! let bytes = encode_record(&rec).unwrap();
//! assert_eq!(decode_record(&bytes).unwrap(), rec);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod record;

pub use codec::{decode_record, encode_record};
pub use error::{CodecError, CodecResult};
pub use record::{Element, Record, FLAG_ALLOW_DUPLICATE_VALUES, FLAG_FORCE_UNIQUE_INDEX};

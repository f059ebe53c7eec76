//! CBOR packing and unpacking of records.

use crate::error::{CodecError, CodecResult};
use crate::record::{Element, Record};
use bytes::Bytes;
use ciborium::value::Value;

/// Packs a record into its stored byte form.
///
/// The layout is a two-element array `[dn, elements]` where each element
/// is `[name, flags, [value, ...]]` and values are CBOR byte strings.
/// The shape is fixed, so identical records pack to identical bytes.
///
/// # Errors
///
/// Returns an error if CBOR serialization fails.
pub fn encode_record(record: &Record) -> CodecResult<Vec<u8>> {
    let elements: Vec<Value> = record
        .elements
        .iter()
        .map(|el| {
            Value::Array(vec![
                Value::Text(el.name.clone()),
                Value::Integer(el.flags.into()),
                Value::Array(
                    el.values
                        .iter()
                        .map(|v| Value::Bytes(v.to_vec()))
                        .collect(),
                ),
            ])
        })
        .collect();

    let top = Value::Array(vec![
        Value::Text(record.dn.clone()),
        Value::Array(elements),
    ]);

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&top, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Unpacks a record from its stored byte form.
///
/// # Errors
///
/// Returns an error if the bytes are not CBOR or not the record shape.
pub fn decode_record(bytes: &[u8]) -> CodecResult<Record> {
    let top: Value = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;

    let mut top = match top {
        Value::Array(items) if items.len() == 2 => items,
        _ => return Err(CodecError::invalid_structure("expected [dn, elements]")),
    };
    let elements_value = top.pop().expect("len checked");
    let dn_value = top.pop().expect("len checked");

    let dn = match dn_value {
        Value::Text(dn) => dn,
        _ => return Err(CodecError::invalid_structure("dn must be a text string")),
    };

    let element_items = match elements_value {
        Value::Array(items) => items,
        _ => return Err(CodecError::invalid_structure("elements must be an array")),
    };

    let mut elements = Vec::with_capacity(element_items.len());
    for item in element_items {
        elements.push(decode_element(item)?);
    }

    Ok(Record { dn, elements })
}

fn decode_element(item: Value) -> CodecResult<Element> {
    let mut parts = match item {
        Value::Array(parts) if parts.len() == 3 => parts,
        _ => {
            return Err(CodecError::invalid_structure(
                "element must be [name, flags, values]",
            ))
        }
    };
    let values_value = parts.pop().expect("len checked");
    let flags_value = parts.pop().expect("len checked");
    let name_value = parts.pop().expect("len checked");

    let name = match name_value {
        Value::Text(name) => name,
        _ => {
            return Err(CodecError::invalid_structure(
                "element name must be a text string",
            ))
        }
    };

    let flags: u32 = match flags_value {
        Value::Integer(n) => u32::try_from(n)
            .map_err(|_| CodecError::invalid_structure("element flags out of range"))?,
        _ => {
            return Err(CodecError::invalid_structure(
                "element flags must be an integer",
            ))
        }
    };

    let value_items = match values_value {
        Value::Array(items) => items,
        _ => {
            return Err(CodecError::invalid_structure(
                "element values must be an array",
            ))
        }
    };

    let mut values = Vec::with_capacity(value_items.len());
    for value in value_items {
        match value {
            Value::Bytes(b) => values.push(Bytes::from(b)),
            _ => {
                return Err(CodecError::invalid_structure(
                    "element value must be a byte string",
                ))
            }
        }
    }

    Ok(Element {
        name,
        flags,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty_record() {
        let rec = Record::new("CN=A,O=X");
        let bytes = encode_record(&rec).unwrap();
        assert_eq!(decode_record(&bytes).unwrap(), rec);
    }

    #[test]
    fn roundtrip_record_with_elements() {
        let rec = Record::new("CN=Alice,O=X")
            .with_element(Element::single("cn", "Alice"))
            .with_element(Element::new(
                "mail",
                vec![Bytes::from("a@x"), Bytes::from("b@x")],
            ));
        let bytes = encode_record(&rec).unwrap();
        assert_eq!(decode_record(&bytes).unwrap(), rec);
    }

    #[test]
    fn roundtrip_binary_values() {
        let guid = Bytes::from(vec![0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 255]);
        let rec = Record::new("CN=A,O=X").with_element(Element::new("objectGUID", vec![guid]));
        let bytes = encode_record(&rec).unwrap();
        assert_eq!(decode_record(&bytes).unwrap(), rec);
    }

    #[test]
    fn identical_records_pack_identically() {
        let rec = Record::new("CN=A,O=X").with_element(Element::single("cn", "A"));
        assert_eq!(encode_record(&rec).unwrap(), encode_record(&rec).unwrap());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode_record(b"not cbor at all").is_err());
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&Value::Text("just a string".into()), &mut buf).unwrap();
        let err = decode_record(&buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStructure { .. }));
    }
}

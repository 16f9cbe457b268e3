use crate::value::{Array, Key, Value};

/// Tracks the layout of a decoded PHP array so that fields the typed models
/// don't understand are written back untouched and in their original position.
#[derive(Debug, Clone, Default)]
pub(crate) struct Fields {
    slots: Vec<Slot>,
}

#[derive(Debug, Clone)]
enum Slot {
    /// Position of a field that was lifted into a typed model field.
    Known(&'static str),
    /// A field passed through verbatim.
    Unknown(Key, Value),
}

impl Fields {
    pub(crate) fn known(&mut self, name: &'static str) {
        self.slots.push(Slot::Known(name));
    }

    pub(crate) fn unknown(&mut self, key: Key, value: Value) {
        self.slots.push(Slot::Unknown(key, value));
    }

    pub(crate) fn has_known(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| matches!(slot, Slot::Known(n) if *n == name))
    }

    /// Pass-through value stored under a string key.
    pub(crate) fn get(&self, name: &str) -> Option<&Value> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Unknown(key, value) if key.as_str() == Some(name) => Some(value),
            _ => None,
        })
    }

    /// Typed string fields are only written when they were present originally
    /// or carry a value, so that unchanged metadata encodes byte-for-byte.
    pub(crate) fn string(&self, name: &'static str, value: &str) -> Option<Value> {
        (self.has_known(name) || !value.is_empty()).then(|| Value::String(value.to_string()))
    }

    /// Merge the typed fields back into the recorded layout.
    ///
    /// Typed fields land where they were read from. A typed field without a
    /// recorded position replaces a pass-through entry with the same key, or
    /// is appended at the end when there is none.
    pub(crate) fn encode(&self, mut typed: Vec<(&'static str, Option<Value>)>) -> Array {
        let mut take = |name: &str| typed.iter_mut().find(|(n, _)| *n == name).and_then(|(_, v)| v.take());
        let mut array = Array::new();
        for slot in &self.slots {
            match slot {
                Slot::Known(name) => {
                    if let Some(value) = take(*name) {
                        array.insert(*name, value);
                    }
                },
                Slot::Unknown(key, value) => {
                    let replacement = key.as_str().filter(|k| !self.has_known(k)).and_then(&mut take);
                    array.insert(key.clone(), replacement.unwrap_or_else(|| value.clone()));
                },
            }
        }
        for (name, value) in typed {
            if let Some(value) = value {
                array.insert(name, value);
            }
        }
        array
    }

    /// Compares the pass-through entries, ignoring those a typed field
    /// overrides on encode (`shadowed`).
    pub(crate) fn same_unknowns(&self, other: &Self, shadowed: &[&str]) -> bool {
        let visible = |fields: &Self| -> Vec<(Key, Value)> {
            fields
                .slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Unknown(key, _) if key.as_str().is_some_and(|k| shadowed.contains(&k)) => None,
                    Slot::Unknown(key, value) => Some((key.clone(), value.clone())),
                    Slot::Known(_) => None,
                })
                .collect()
        };
        visible(self) == visible(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Fields {
        let mut fields = Fields::default();
        fields.unknown(Key::from("width"), Value::Int(10));
        fields.known("file");
        fields.unknown(Key::from("s3"), Value::Int(0));
        fields
    }

    #[test]
    fn test_typed_fields_keep_their_position() {
        let array = layout().encode(vec![("file", Some(Value::String("a.jpg".into())))]);
        assert_eq!(
            Value::Array(array).serialize(),
            "a:3:{s:5:\"width\";i:10;s:4:\"file\";s:5:\"a.jpg\";s:2:\"s3\";i:0;}"
        );
    }

    #[test]
    fn test_typed_field_replaces_pass_through_entry() {
        let array = layout().encode(vec![("file", Some(Value::String("a.jpg".into()))), ("s3", Some(Value::Null))]);
        assert_eq!(array.get("s3"), Some(&Value::Null));
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_new_typed_field_is_appended() {
        let array = layout().encode(vec![("file", None), ("mime-type", Some(Value::String("image/png".into())))]);
        let keys: Vec<String> = array.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["width", "s3", "mime-type"]);
    }

    #[test]
    fn test_same_unknowns_respects_shadowing() {
        let mut other = Fields::default();
        other.unknown(Key::from("width"), Value::Int(10));
        other.known("file");
        other.known("s3");
        assert!(!layout().same_unknowns(&other, &[]));
        assert!(layout().same_unknowns(&other, &["s3"]));
        assert_eq!(layout().get("width"), Some(&Value::Int(10)));
        assert!(layout().string("file", "").is_some());
        assert!(layout().string("privacy", "").is_none());
    }
}

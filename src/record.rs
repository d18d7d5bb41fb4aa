use std::fmt;

/// One finished, serialized log line.
///
/// The writer never looks inside a record: the bytes are handed to every
/// destination exactly as the producer built them, trailing newline included.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Record(Box<[u8]>);

impl Record {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Record(bytes.into().into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Record {
    fn from(bytes: Vec<u8>) -> Self {
        Record::new(bytes)
    }
}

impl From<&[u8]> for Record {
    fn from(bytes: &[u8]) -> Self {
        Record::new(bytes)
    }
}

impl From<String> for Record {
    fn from(line: String) -> Self {
        Record::new(line.into_bytes())
    }
}

impl From<&str> for Record {
    fn from(line: &str) -> Self {
        Record::new(line.as_bytes())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Record")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}

/// Queue slot: either a record or the shutdown marker pushed by `stop()`.
#[derive(Debug)]
pub(crate) enum Entry {
    Record(Record),
    Poison,
}

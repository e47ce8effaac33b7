//! Binary codec for callback payloads / 回调负载的二进制编解码
//!
//! Every count and length is an unsigned LEB128 integer:
//! - UID set: `count, uid*`
//! - encrypted table: `count, (uid, len, value)*`
//! - upsert data: `count, (uid, old_len, old, new_len, new)*`, `old_len = 0` means no old value

use super::{EncryptedTable, Uid, UidSet, UpsertData, UpsertLine, UID_LENGTH};

/// Longest LEB128 encoding of a u64 / u64 的最长 LEB128 编码
const MAX_LEB128_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("LEB128 integer does not fit in 64 bits")]
    Leb128Overflow,
    #[error("length {0} does not fit in memory")]
    LengthTooLarge(u64),
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("UID must be {expected} bytes, got {actual}")]
    InvalidUidLength { expected: usize, actual: usize },
}

/// Append-only payload writer / 负载写入器
#[derive(Debug, Default)]
pub struct Serializer {
    buffer: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_leb128_u64(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buffer.push(byte);
                return;
            }
            self.buffer.push(byte | 0x80);
        }
    }

    /// Raw bytes, no length prefix
    pub fn write_array(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Length-prefixed bytes
    pub fn write_vec(&mut self, bytes: &[u8]) {
        self.write_leb128_u64(bytes.len() as u64);
        self.write_array(bytes);
    }

    pub fn finalize(self) -> Vec<u8> {
        self.buffer
    }
}

/// Payload reader over a borrowed buffer / 负载读取器
#[derive(Debug)]
pub struct Deserializer<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.position
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::UnexpectedEnd { needed, remaining });
        }
        let slice = &self.input[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    pub fn read_leb128_u64(&mut self) -> Result<u64, CodecError> {
        let mut result = 0u64;
        for i in 0..MAX_LEB128_LENGTH {
            let byte = self.take(1)?[0];
            let low = u64::from(byte & 0x7f);
            // the tenth byte may only carry the top bit of the u64
            if i == MAX_LEB128_LENGTH - 1 && low > 1 {
                return Err(CodecError::Leb128Overflow);
            }
            result |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::Leb128Overflow)
    }

    fn read_length(&mut self) -> Result<usize, CodecError> {
        let length = self.read_leb128_u64()?;
        usize::try_from(length).map_err(|_| CodecError::LengthTooLarge(length))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_vec(&mut self) -> Result<Vec<u8>, CodecError> {
        let length = self.read_length()?;
        Ok(self.take(length)?.to_vec())
    }

    pub fn read_uid(&mut self) -> Result<Uid, CodecError> {
        self.read_array::<UID_LENGTH>().map(Uid)
    }

    /// Fails if anything is left unread
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    /// Bounded capacity hint so a forged count cannot force a huge allocation
    fn capacity_hint(&self, count: usize, min_item_size: usize) -> usize {
        count.min(self.remaining() / min_item_size.max(1))
    }
}

pub fn serialize_uid_set(uids: &UidSet) -> Vec<u8> {
    let mut ser = Serializer::new();
    ser.write_leb128_u64(uids.len() as u64);
    for uid in uids {
        ser.write_array(uid.as_bytes());
    }
    ser.finalize()
}

pub fn deserialize_uid_set(bytes: &[u8]) -> Result<UidSet, CodecError> {
    let mut de = Deserializer::new(bytes);
    let count = de.read_length()?;
    let mut uids = UidSet::with_capacity(de.capacity_hint(count, UID_LENGTH));
    for _ in 0..count {
        uids.insert(de.read_uid()?);
    }
    de.finish()?;
    Ok(uids)
}

pub fn serialize_encrypted_table(table: &EncryptedTable) -> Vec<u8> {
    let mut ser = Serializer::new();
    ser.write_leb128_u64(table.len() as u64);
    for (uid, value) in table {
        ser.write_array(uid.as_bytes());
        ser.write_vec(value);
    }
    ser.finalize()
}

pub fn deserialize_encrypted_table(bytes: &[u8]) -> Result<EncryptedTable, CodecError> {
    let mut de = Deserializer::new(bytes);
    let count = de.read_length()?;
    let mut table = EncryptedTable::with_capacity(de.capacity_hint(count, UID_LENGTH + 1));
    for _ in 0..count {
        let uid = de.read_uid()?;
        let value = de.read_vec()?;
        table.insert(uid, value);
    }
    de.finish()?;
    Ok(table)
}

pub fn serialize_upsert_data(data: &UpsertData) -> Vec<u8> {
    let mut ser = Serializer::new();
    ser.write_leb128_u64(data.len() as u64);
    for (uid, line) in data {
        ser.write_array(uid.as_bytes());
        ser.write_vec(line.old_value.as_deref().unwrap_or_default());
        ser.write_vec(&line.new_value);
    }
    ser.finalize()
}

pub fn deserialize_upsert_data(bytes: &[u8]) -> Result<UpsertData, CodecError> {
    let mut de = Deserializer::new(bytes);
    let count = de.read_length()?;
    let mut data = UpsertData::with_capacity(de.capacity_hint(count, UID_LENGTH + 2));
    for _ in 0..count {
        let uid = de.read_uid()?;
        let old_value = de.read_vec()?;
        let new_value = de.read_vec()?;
        let old_value = if old_value.is_empty() { None } else { Some(old_value) };
        data.insert(uid, UpsertLine::new(old_value, new_value));
    }
    de.finish()?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(byte: u8) -> Uid {
        Uid([byte; UID_LENGTH])
    }

    #[test]
    fn test_leb128_known_encodings() {
        let mut ser = Serializer::new();
        ser.write_leb128_u64(0);
        ser.write_leb128_u64(127);
        ser.write_leb128_u64(128);
        ser.write_leb128_u64(300);
        assert_eq!(ser.finalize(), vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);

        let mut de = Deserializer::new(&[0xac, 0x02]);
        assert_eq!(de.read_leb128_u64().unwrap(), 300);
        de.finish().unwrap();
    }

    #[test]
    fn test_leb128_u64_max() {
        let mut ser = Serializer::new();
        ser.write_leb128_u64(u64::MAX);
        let bytes = ser.finalize();
        assert_eq!(bytes.len(), MAX_LEB128_LENGTH);
        assert_eq!(Deserializer::new(&bytes).read_leb128_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn test_leb128_overflow() {
        let too_long = [0xffu8; 11];
        assert_eq!(
            Deserializer::new(&too_long).read_leb128_u64(),
            Err(CodecError::Leb128Overflow)
        );

        let mut too_big = vec![0xffu8; 9];
        too_big.push(0x02);
        assert_eq!(
            Deserializer::new(&too_big).read_leb128_u64(),
            Err(CodecError::Leb128Overflow)
        );
    }

    #[test]
    fn test_uid_set_layout() {
        let uids: UidSet = [uid(7)].into_iter().collect();
        let bytes = serialize_uid_set(&uids);
        assert_eq!(bytes.len(), 1 + UID_LENGTH);
        assert_eq!(bytes[0], 1);
        assert!(bytes[1..].iter().all(|b| *b == 7));
        assert_eq!(deserialize_uid_set(&bytes).unwrap(), uids);
    }

    #[test]
    fn test_uid_set_duplicates_collapse() {
        let mut ser = Serializer::new();
        ser.write_leb128_u64(2);
        ser.write_array(uid(1).as_bytes());
        ser.write_array(uid(1).as_bytes());
        let uids = deserialize_uid_set(&ser.finalize()).unwrap();
        assert_eq!(uids.len(), 1);
    }

    #[test]
    fn test_empty_payloads() {
        assert!(deserialize_uid_set(&[0]).unwrap().is_empty());
        assert!(deserialize_encrypted_table(&[0]).unwrap().is_empty());
        assert!(deserialize_upsert_data(&[0]).unwrap().is_empty());
        assert!(deserialize_uid_set(&[]).is_err());
    }

    #[test]
    fn test_encrypted_table_round_trip() {
        let mut table = EncryptedTable::new();
        table.insert(uid(1), b"first".to_vec());
        table.insert(uid(2), vec![]);
        let bytes = serialize_encrypted_table(&table);
        assert_eq!(deserialize_encrypted_table(&bytes).unwrap(), table);
    }

    #[test]
    fn test_upsert_data_empty_old_value_is_none() {
        let mut data = UpsertData::new();
        data.insert(uid(1), UpsertLine::new(None, b"new".to_vec()));
        data.insert(uid(2), UpsertLine::new(Some(b"old".to_vec()), b"newer".to_vec()));

        let decoded = deserialize_upsert_data(&serialize_upsert_data(&data)).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded[&uid(1)].old_value, None);
    }

    #[test]
    fn test_truncated_payload() {
        let mut table = EncryptedTable::new();
        table.insert(uid(9), b"value".to_vec());
        let bytes = serialize_encrypted_table(&table);

        let err = deserialize_encrypted_table(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err, CodecError::UnexpectedEnd { needed: 5, remaining: 4 });
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = serialize_uid_set(&UidSet::new());
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(deserialize_uid_set(&bytes), Err(CodecError::TrailingBytes(3)));
    }

    #[test]
    fn test_forged_count_does_not_allocate() {
        let mut ser = Serializer::new();
        ser.write_leb128_u64(u32::MAX as u64);
        let bytes = ser.finalize();
        assert!(matches!(
            deserialize_uid_set(&bytes),
            Err(CodecError::UnexpectedEnd { .. })
        ));
    }
}

// Data blobs and memory-backed file streams
//
// Small byte-buffer objects used to move shader bytecode, pipeline caches and
// other binary payloads through the object model.

use parking_lot::Mutex;

use crate::interface::{DataBlob, FileStream, SeekOrigin};
use crate::object::{Object, RefPtr};

/// Growable byte buffer.
pub struct DataBlobImpl {
    data: Mutex<Vec<u8>>,
}

impl DataBlobImpl {
    pub fn create(initial_size: usize) -> RefPtr<DataBlobImpl> {
        Self::from_vec(vec![0; initial_size])
    }

    pub fn from_vec(data: Vec<u8>) -> RefPtr<DataBlobImpl> {
        RefPtr::with_capabilities(
            DataBlobImpl {
                data: Mutex::new(data),
            },
            crate::capabilities!(DataBlobImpl { dyn DataBlob }),
        )
    }
}

impl Object for DataBlobImpl {}

impl DataBlob for DataBlobImpl {
    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn resize(&self, size: usize) {
        self.data.lock().resize(size, 0);
    }

    fn read_at(&self, offset: usize, out: &mut [u8]) -> bool {
        let data = self.data.lock();
        match offset.checked_add(out.len()) {
            Some(end) if end <= data.len() => {
                out.copy_from_slice(&data[offset..end]);
                true
            }
            _ => false,
        }
    }

    fn write_at(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.lock();
        let end = offset + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
    }

    fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

/// Read/write stream over a data blob, with its own cursor.
pub struct MemoryFileStream {
    blob: RefPtr<dyn DataBlob>,
    cursor: Mutex<usize>,
}

impl MemoryFileStream {
    pub fn create(blob: RefPtr<dyn DataBlob>) -> RefPtr<MemoryFileStream> {
        RefPtr::with_capabilities(
            MemoryFileStream {
                blob,
                cursor: Mutex::new(0),
            },
            crate::capabilities!(MemoryFileStream { dyn FileStream }),
        )
    }

    pub fn blob(&self) -> &RefPtr<dyn DataBlob> {
        &self.blob
    }
}

impl Object for MemoryFileStream {}

impl FileStream for MemoryFileStream {
    fn read_blob(&self, dst: &dyn DataBlob) {
        let mut cursor = self.cursor.lock();
        let remaining = self.blob.size().saturating_sub(*cursor);
        let mut bytes = vec![0; remaining];
        if self.blob.read_at(*cursor, &mut bytes) {
            dst.resize(remaining);
            dst.write_at(0, &bytes);
            *cursor += remaining;
        }
    }

    fn read(&self, out: &mut [u8]) -> bool {
        let mut cursor = self.cursor.lock();
        let ok = self.blob.read_at(*cursor, out);
        if ok {
            *cursor += out.len();
        }
        ok
    }

    fn write(&self, data: &[u8]) -> bool {
        let mut cursor = self.cursor.lock();
        self.blob.write_at(*cursor, data);
        *cursor += data.len();
        true
    }

    fn size(&self) -> usize {
        self.blob.size()
    }

    fn pos(&self) -> usize {
        *self.cursor.lock()
    }

    fn set_pos(&self, offset: i64, origin: SeekOrigin) -> bool {
        let mut cursor = self.cursor.lock();
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => *cursor as i64,
            SeekOrigin::End => self.blob.size() as i64,
        };
        match base.checked_add(offset) {
            Some(pos) if pos >= 0 && pos as usize <= self.blob.size() => {
                *cursor = pos as usize;
                true
            }
            _ => false,
        }
    }

    fn is_valid(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_over(bytes: &[u8]) -> (RefPtr<dyn DataBlob>, RefPtr<MemoryFileStream>) {
        let blob = DataBlobImpl::from_vec(bytes.to_vec()).query::<dyn DataBlob>().unwrap();
        let stream = MemoryFileStream::create(blob.clone());
        (blob, stream)
    }

    #[test]
    fn test_read_advances_only_on_success() {
        let (_, stream) = stream_over(b"abcdef");
        let mut buf = [0u8; 4];
        assert!(stream.read(&mut buf));
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.pos(), 4);

        assert!(!stream.read(&mut buf));
        assert_eq!(stream.pos(), 4);
    }

    #[test]
    fn test_write_past_end_grows_blob() {
        let (blob, stream) = stream_over(b"xyz");
        assert!(stream.set_pos(-1, SeekOrigin::End));
        assert!(stream.write(b"ZZZ"));
        assert_eq!(blob.to_vec(), b"xyZZZ".to_vec());
        assert_eq!(stream.size(), 5);
        assert_eq!(stream.pos(), 5);
    }

    #[test]
    fn test_set_pos_bounds() {
        let (_, stream) = stream_over(b"0123456789");
        assert!(stream.set_pos(3, SeekOrigin::Start));
        assert!(stream.set_pos(2, SeekOrigin::Current));
        assert_eq!(stream.pos(), 5);
        assert!(!stream.set_pos(-6, SeekOrigin::Current));
        assert!(!stream.set_pos(1, SeekOrigin::End));
        assert!(stream.set_pos(0, SeekOrigin::End));
        assert_eq!(stream.pos(), 10);
    }

    #[test]
    fn test_read_blob_takes_remainder() {
        let (_, stream) = stream_over(b"header:payload");
        stream.set_pos(7, SeekOrigin::Start);
        let dst = DataBlobImpl::create(0);
        stream.read_blob(&*dst);
        assert_eq!(dst.to_vec(), b"payload".to_vec());
        assert_eq!(stream.pos(), stream.size());
    }

    #[test]
    fn test_stream_keeps_blob_alive() {
        let (blob, stream) = stream_over(b"data");
        assert_eq!(RefPtr::ref_count(&blob), 2);
        drop(stream);
        assert_eq!(RefPtr::ref_count(&blob), 1);
    }
}

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::read::BzDecoder;
use exn::ResultExt;
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::instrument;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

impl Compression {
    /// Put the decoder for this format in front of `reader`.
    ///
    /// ```
    /// use ferry_compress::Compression;
    /// use std::io::{Cursor, Read};
    ///
    /// let mut decoded = String::new();
    /// Compression::None.wrap_reader(Cursor::new("a,b\n")).unwrap().read_to_string(&mut decoded).unwrap();
    /// assert_eq!(decoded, "a,b\n");
    /// ```
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
            Compression::Xz => {
                // The auto decoder also accepts LZMA-alone input.
                let stream = Stream::new_auto_decoder(u64::MAX, 0).or_raise(|| ErrorKind::Decoder)?;
                Box::new(XzDecoder::new_stream(reader, stream))
            },
        })
    }

    /// Decode everything `reader` yields into `writer`. Returns the decoded
    /// size.
    pub fn decompress_stream<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<u64> {
        let mut decoder = self.wrap_reader(reader)?;
        std::io::copy(&mut decoder, &mut writer).or_raise(|| ErrorKind::InvalidData)
    }

    /// Decode the file at `source` into `target`, replacing it and creating
    /// its parent directories.
    #[instrument(skip_all, fields(format = %self, source = %source.as_ref().display(), size))]
    pub fn decompress_file(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<u64> {
        let target = target.as_ref();
        let reader = BufReader::new(File::open(source).or_raise(|| ErrorKind::Io)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        let mut writer = BufWriter::new(File::create(target).or_raise(|| ErrorKind::Io)?);
        let size = self.decompress_stream(reader, &mut writer)?;
        writer.flush().or_raise(|| ErrorKind::Io)?;
        tracing::Span::current().record("size", size);
        Ok(size)
    }

    /// The first `limit` decoded bytes of the file at `path`, or fewer if the
    /// content is shorter.
    ///
    /// Used to look for a container header without decoding the whole file.
    pub fn decode_head(&self, path: impl AsRef<Path>, limit: usize) -> Result<Vec<u8>> {
        let reader = BufReader::new(File::open(path).or_raise(|| ErrorKind::Io)?);
        let mut head = Vec::with_capacity(limit);
        self.wrap_reader(reader)?
            .take(limit as u64)
            .read_to_end(&mut head)
            .or_raise(|| ErrorKind::InvalidData)?;
        Ok(head)
    }
}

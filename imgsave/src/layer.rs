use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzDecoder;
use futures_util::StreamExt;
use ociclient::media_type::{Encoding, blob_file_name};
use ociclient::{BlobError, ClientSession, Descriptor, OciDigest};
use tracing::debug;

use crate::error::MaterializeError;

/// Where a blob lands: gzip layers go to `<destination>/<legacy id>/layer.tar`,
/// everything else to `<destination>/<hex>.json`.
///
/// The digest must be a well-formed sha256 digest, so a file name derived
/// from it stays inside `destination`.
pub fn target_path(
    layer: &Descriptor,
    destination: &Path,
    legacy_id: Option<&str>,
) -> Result<PathBuf, MaterializeError> {
    let digest = parse_digest(layer)?;
    let file_name = blob_file_name(&layer.media_type, &digest);
    match Encoding::for_media_type(&layer.media_type) {
        Encoding::Gzip => {
            let legacy_id = legacy_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| MaterializeError::MissingLegacyId {
                    digest: layer.digest.clone(),
                })?;
            Ok(destination.join(legacy_id).join(file_name))
        }
        Encoding::Identity => Ok(destination.join(file_name)),
    }
}

fn parse_digest(layer: &Descriptor) -> Result<OciDigest, MaterializeError> {
    if layer.digest.is_empty() {
        return Err(MaterializeError::EmptyDigest);
    }
    layer
        .digest
        .parse::<OciDigest>()
        .map_err(|e| MaterializeError::InvalidDigest {
            digest: layer.digest.clone(),
            reason: e.to_string(),
        })
}

/// Counts what reaches the file and remembers whether the file itself failed,
/// so a broken gzip stream can be told apart from a failing disk.
struct TrackedWriter<W> {
    inner: W,
    written: u64,
    failed: bool,
}

impl<W: Write> Write for TrackedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().inspect_err(|_| self.failed = true)
    }
}

enum Sink<W: Write> {
    Plain(TrackedWriter<W>),
    Gunzip(GzDecoder<TrackedWriter<W>>),
}

impl<W: Write> Sink<W> {
    fn new(inner: W, encoding: Encoding) -> Self {
        let tracked = TrackedWriter {
            inner,
            written: 0,
            failed: false,
        };
        match encoding {
            Encoding::Gzip => Sink::Gunzip(GzDecoder::new(tracked)),
            Encoding::Identity => Sink::Plain(tracked),
        }
    }

    fn tracked(&self) -> &TrackedWriter<W> {
        match self {
            Sink::Plain(tracked) => tracked,
            Sink::Gunzip(decoder) => decoder.get_ref(),
        }
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Sink::Plain(tracked) => tracked.write_all(chunk),
            Sink::Gunzip(decoder) => decoder.write_all(chunk),
        }
    }

    fn finish(&mut self) -> io::Result<u64> {
        match self {
            Sink::Plain(tracked) => tracked.flush()?,
            Sink::Gunzip(decoder) => {
                decoder.try_finish()?;
                decoder.get_mut().flush()?;
            }
        }
        Ok(self.tracked().written)
    }
}

/// Downloads blobs of one repository into the output tree
pub struct LayerMaterializer<'a> {
    session: &'a ClientSession,
}

impl<'a> LayerMaterializer<'a> {
    pub fn new(session: &'a ClientSession) -> Self {
        Self { session }
    }

    /// Stream `layer` to disk below `destination`, gunzipping gzip layers.
    ///
    /// `legacy_id` is required for gzip layers and marks the blob as a layer
    /// rather than the image config. Returns the number of bytes written.
    pub async fn materialize(
        &self,
        layer: &Descriptor,
        destination: &Path,
        legacy_id: Option<&str>,
    ) -> Result<u64, MaterializeError> {
        let digest = parse_digest(layer)?;
        let target = target_path(layer, destination, legacy_id)?;

        let accept = legacy_id.map(|_| layer.media_type.as_str());
        let response = self
            .session
            .fetch_blob(layer, accept)
            .await
            .map_err(|source| MaterializeError::BlobFetchFailed {
                digest: layer.digest.clone(),
                source,
            })?;

        debug!("Writing to {}", target.display());
        let file = File::create(&target).map_err(|source| MaterializeError::WriteFailed {
            path: target.clone(),
            source,
        })?;
        let mut sink = Sink::new(BufWriter::new(file), Encoding::for_media_type(&layer.media_type));

        let classify = |sink: &Sink<BufWriter<File>>, source: io::Error| {
            if sink.tracked().failed || matches!(sink, Sink::Plain(_)) {
                MaterializeError::WriteFailed {
                    path: target.clone(),
                    source,
                }
            } else {
                MaterializeError::DecompressionFailed {
                    digest: layer.digest.clone(),
                    source,
                }
            }
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MaterializeError::BlobFetchFailed {
                digest: layer.digest.clone(),
                source: BlobError::Http(e),
            })?;
            sink.write_chunk(&chunk).map_err(|e| classify(&sink, e))?;
        }
        let written = sink.finish().map_err(|e| classify(&sink, e))?;

        debug!("Copied {}/{} bytes for {}", written, layer.size, digest.short());
        Ok(written)
    }
}

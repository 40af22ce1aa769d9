//! Single-item downloads (`POST /download`)

use super::MediaRelay;
use crate::batch::{BatchSession, write_stream_to_file};
use crate::error::{Error, Result};
use crate::events::{JobLogger, TracingLogger};
use crate::relay::RelayStream;
use crate::types::RelayRequest;
use crate::utils::{content_type_for, expand_source_ref, resolve_output_dir, sanitize_filename};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// A download ready to be sent to the client
#[derive(Debug)]
pub struct SingleDownload {
    /// Suggested file name for `Content-Disposition`
    pub filename: String,
    /// MIME type derived from the container
    pub content_type: &'static str,
    /// Body size, when known up front
    pub content_length: Option<u64>,
    /// The bytes
    pub body: SingleBody,
}

/// Body of a [`SingleDownload`]
#[derive(Debug)]
pub enum SingleBody {
    /// Bytes relayed from the origin as they arrive
    Relayed(RelayStream),
    /// Trimmed file on disk; its working directory lives as long as the body
    Trimmed {
        /// Open handle to the trimmed file
        file: tokio::fs::File,
        /// Session owning the file
        session: BatchSession,
    },
}

impl SingleDownload {
    /// Convert the body into a byte stream
    ///
    /// For trimmed downloads the working directory is removed once the stream
    /// is dropped.
    pub fn into_byte_stream(self, chunk_size: usize) -> BoxStream<'static, Result<Bytes>> {
        match self.body {
            SingleBody::Relayed(stream) => stream.boxed(),
            SingleBody::Trimmed { file, session } => {
                let reader = ReaderStream::with_capacity(file, chunk_size);
                futures::stream::unfold((reader, session), |(mut reader, session)| async move {
                    let chunk = reader.next().await?;
                    Some((chunk.map_err(Error::Io), (reader, session)))
                })
                .boxed()
            }
        }
    }
}

impl MediaRelay {
    /// Prepare a single-item download
    ///
    /// Without a trim range the origin is relayed directly: this waits until
    /// the first attempt is accepted so resolution and retry failures become
    /// errors here, not truncated bodies. With a trim range the item is fetched
    /// into a working directory, trimmed, and served from disk.
    ///
    /// # Errors
    ///
    /// Validation errors, resolver failures, exhausted retries, fatal origin
    /// statuses and trim failures.
    pub async fn relay_single(&self, request: RelayRequest) -> Result<SingleDownload> {
        self.ensure_accepting()?;
        let item = request.url.trim();
        if item.is_empty() {
            return Err(Error::InvalidRequest("url must not be empty".into()));
        }
        match request.trim() {
            None => self.relay_direct(&request).await,
            Some(_) => self.fetch_and_trim(&request).await,
        }
    }

    async fn relay_direct(&self, request: &RelayRequest) -> Result<SingleDownload> {
        let source_ref = expand_source_ref(&self.config.download.item_url_template, &request.url);
        let logger: Arc<dyn JobLogger> = Arc::new(TracingLogger::new(source_ref.clone()));

        let mut stream = self.relay.relay(
            source_ref.clone(),
            request.format_selector(),
            logger,
            self.shutdown.child_token(),
        );
        let info = stream.ready().await?;

        let filename = format!(
            "{}.{}",
            sanitize_filename(info.title.as_deref().unwrap_or("video")),
            info.container
        );
        tracing::info!(
            source = %source_ref,
            file = %filename,
            format_id = ?info.format_id,
            total_bytes = ?info.total_bytes,
            "Relaying single download"
        );

        Ok(SingleDownload {
            content_type: content_type_for(&info.container),
            content_length: info.total_bytes,
            filename,
            body: SingleBody::Relayed(stream),
        })
    }

    /// Fetch to disk, trim, and open the trimmed file
    async fn fetch_and_trim(&self, request: &RelayRequest) -> Result<SingleDownload> {
        let range = request
            .trim()
            .ok_or_else(|| Error::InvalidRequest("no trim range requested".into()))?;
        let transcoder = &self.collaborators.transcoder;
        if !transcoder.can_trim() {
            return Err(Error::NotSupported(format!(
                "trimming is not available with the {} transcoder",
                transcoder.name()
            )));
        }
        let output_dir =
            resolve_output_dir(self.config.download_dir(), request.download_path.as_deref())?;
        let session = BatchSession::create(&output_dir, None, Vec::new(), &self.sessions)?;

        let source_ref = expand_source_ref(&self.config.download.item_url_template, &request.url);
        let logger: Arc<dyn JobLogger> = Arc::new(TracingLogger::new(source_ref.clone()));

        let mut stream = self.relay.relay(
            source_ref.clone(),
            request.format_selector(),
            logger.clone(),
            self.shutdown.child_token(),
        );
        let info = stream.ready().await?;
        let name = format!(
            "{}.{}",
            sanitize_filename(info.title.as_deref().unwrap_or("video")),
            info.container
        );
        let downloaded = session.working_dir().join(&name);
        let bytes = write_stream_to_file(
            &mut stream,
            &downloaded,
            self.config.relay.chunk_size,
            |_, _| {},
        )
        .await?;
        tracing::debug!(source = %source_ref, bytes, "Fetched item for trimming");

        let trimmed_name = format!("trimmed_{name}");
        let trimmed = session.working_dir().join(&trimmed_name);
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
            result = transcoder.trim(&downloaded, &trimmed, &range, logger.as_ref()) => result?,
        }
        if let Err(e) = tokio::fs::remove_file(&downloaded).await {
            tracing::warn!(path = %downloaded.display(), error = %e, "Failed to remove untrimmed file");
        }

        let file = tokio::fs::File::open(&trimmed).await?;
        let len = file.metadata().await?.len();
        tracing::info!(source = %source_ref, file = %trimmed_name, bytes = len, "Serving trimmed download");

        Ok(SingleDownload {
            content_type: content_type_for(&info.container),
            content_length: Some(len),
            filename: trimmed_name,
            body: SingleBody::Trimmed { file, session },
        })
    }
}

use crate::{error::Result, io::progress::emit_download_progress};
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
    time::Duration,
};
use tracing::debug;

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .build()?)
}

/// Counts bytes on their way to disk and reports them to the progress callback.
struct ProgressWriter<W> {
    inner: W,
    done: u64,
    total: u64,
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.done += n as u64;
        emit_download_progress(self.done, self.total);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streams `url` into `<dest>.part`, then renames it over `dest`. Returns the byte count.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let part = dest.with_extension("part");
    debug!(%url, dest = %dest.display(), "downloading");

    let mut resp = client.get(url).send()?.error_for_status()?;
    let total = resp.content_length().unwrap_or(0);
    emit_download_progress(0, total);

    let mut out = ProgressWriter {
        inner: BufWriter::new(File::create(&part)?),
        done: 0,
        total,
    };
    let written = io::copy(&mut resp, &mut out)?;
    out.flush()?;
    drop(out);

    fs::rename(&part, dest)?;
    emit_download_progress(written, total.max(written));

    Ok(written)
}

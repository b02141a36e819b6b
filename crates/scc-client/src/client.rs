//! SCC operations: login, search, upload, poll, download, rerun, delete.

use std::collections::HashSet;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use netcdf_classic::Dataset;
use regex::Regex;
use reqwest::header::REFERER;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, Credentials};
use crate::error::{Result, SccError};
use crate::lifecycle::{Event, MeasurementRegistry, MeasurementState};
use crate::session::Session;
use crate::types::{AncillaryFile, ListResponse, MeasurementInfo, Page, Product, SearchCriteria};

const LOGIN_PATH: &str = "accounts/login/";
const LOGOUT_PATH: &str = "accounts/logout/";
const UPLOAD_PATH: &str = "data_processing/measurements/quick/";
const MEASUREMENTS_API: &str = "api/v1/measurements/";
const SOUNDINGS_API: &str = "api/v1/sounding_files/";

/// Heading of the measurement page SCC redirects to after an upload.
const MEASUREMENT_ID_PATTERN: &str = r"<h3>Measurement (?P<id>\S+) <small>";

/// Which failures a request is retried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryOn {
    /// Timeouts, connection failures and 5xx responses
    Transient,
    /// Only failures to connect; the request never reached the service
    ConnectOnly,
}

/// Result of one upload in [`SccClient::upload_all`].
#[derive(Debug)]
pub struct UploadOutcome {
    pub path: PathBuf,
    /// Measurement id assigned by SCC
    pub result: Result<String>,
}

/// Artifact fields needed for an upload.
struct UploadRequest {
    id: String,
    system_id: i64,
    file_name: String,
    data: Bytes,
    sounding: Option<(String, Bytes)>,
}

impl UploadRequest {
    async fn read(path: &Path) -> Result<Self> {
        let invalid = |message: String| SccError::InvalidArtifact {
            path: path.display().to_string(),
            message,
        };

        let data = Bytes::from(tokio::fs::read(path).await?);
        let ds = Dataset::from_bytes(data.clone()).map_err(|e| invalid(e.to_string()))?;
        let id = ds
            .text_attribute("Measurement_ID")
            .ok_or_else(|| invalid("missing Measurement_ID attribute".to_string()))?;
        let system_id = ds
            .attribute("X_System_ID")
            .and_then(|v| v.first_f64())
            .ok_or_else(|| invalid("missing X_System_ID attribute".to_string()))?
            as i64;

        let sounding = match ds.text_attribute("Sounding_File_Name") {
            Some(name) => {
                let sounding_path = path.with_file_name(&name);
                match tokio::fs::read(&sounding_path).await {
                    Ok(bytes) => Some((name, Bytes::from(bytes))),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        warn!(path = %sounding_path.display(), "Sounding file not found next to artifact");
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => None,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.nc", id));

        Ok(Self {
            id,
            system_id,
            file_name,
            data,
            sounding,
        })
    }
}

/// Client for one SCC session.
pub struct SccClient {
    session: Arc<Session>,
    config: ClientConfig,
    registry: MeasurementRegistry,
}

impl SccClient {
    pub fn new(session: Arc<Session>, config: ClientConfig) -> Self {
        Self {
            session,
            config,
            registry: MeasurementRegistry::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &MeasurementRegistry {
        &self.registry
    }

    /// Last known state of a measurement.
    pub fn state(&self, id: &str) -> Option<MeasurementState> {
        self.registry.state(id)
    }

    fn require_login(&self) -> Result<()> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(SccError::not_logged_in())
        }
    }

    /// Send a request, retrying failures allowed by `retry` with exponential
    /// backoff. Non-success responses become errors.
    async fn send<F>(&self, retry: RetryOn, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            let (error, retryable) = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let error = SccError::from_status(status, &body);
                    let retryable = retry == RetryOn::Transient && error.is_transient();
                    (error, retryable)
                }
                Err(e) => {
                    let connect = e.is_connect();
                    let error = SccError::from(e);
                    let retryable = match retry {
                        RetryOn::Transient => error.is_transient(),
                        RetryOn::ConnectOnly => connect,
                    };
                    (error, retryable)
                }
            };

            if let SccError::Authentication(_) = error {
                self.session.set_authenticated(false);
            }
            if !retryable || attempt >= self.config.max_retries {
                return Err(error);
            }

            attempt += 1;
            warn!(
                error = %error,
                retry = attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
        }
    }

    async fn get(&self, url: &Url) -> Result<Response> {
        self.send(RetryOn::Transient, || {
            self.session.request(Method::GET, url.clone())
        })
        .await
    }

    /// CSRF token from a page response, falling back to the session's cookie.
    fn csrf_token(&self, page: &Response) -> Result<String> {
        page.cookies()
            .find(|c| c.name() == "csrftoken")
            .map(|c| c.value().to_string())
            .or_else(|| self.session.cookie("csrftoken"))
            .ok_or_else(|| {
                SccError::InvalidResponse(format!("{} did not provide a CSRF token", page.url()))
            })
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Log in. Every other operation requires a successful login first.
    #[instrument(skip(self, credentials), fields(user = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        let url = self.session.url(LOGIN_PATH)?;
        let page = self.get(&url).await?;
        let csrf = self.csrf_token(&page)?;

        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let response = self
            .send(RetryOn::Transient, || {
                self.session
                    .request(Method::POST, url.clone())
                    .header("X-CSRFToken", csrf.as_str())
                    .header(REFERER, url.as_str())
                    .form(&form)
            })
            .await?;

        let body = response.text().await?;
        if body.contains("Wrong username or password") {
            self.session.set_authenticated(false);
            return Err(SccError::Authentication(
                "wrong username or password".to_string(),
            ));
        }

        self.session.set_authenticated(true);
        info!("Logged in to SCC");
        Ok(())
    }

    /// End the session. Local login state is cleared even if the request fails.
    pub async fn logout(&self) -> Result<()> {
        let url = self.session.url(LOGOUT_PATH)?;
        let result = self.get(&url).await.map(|_| ());
        self.session.set_authenticated(false);
        debug!("Logged out of SCC");
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All measurements matching `criteria`, starting from `page` and
    /// following `next` links until the service reports no further page.
    #[instrument(skip(self, criteria), fields(start = %criteria.start, end = %criteria.end))]
    pub async fn search(&self, criteria: &SearchCriteria, page: Page) -> Result<Vec<MeasurementInfo>> {
        self.require_login()?;

        let mut url = self.session.url(MEASUREMENTS_API)?;
        url.query_pairs_mut().extend_pairs(criteria.query(&page));

        let mut visited = HashSet::new();
        let mut results = Vec::new();
        let mut pages = 0;
        loop {
            if !visited.insert(url.to_string()) {
                return Err(SccError::Rejected {
                    status: None,
                    message: format!("pagination returned {} twice", url),
                });
            }

            let body: ListResponse<MeasurementInfo> = self.get(&url).await?.json().await?;
            pages += 1;
            let meta = body.meta;
            debug!(
                page = pages,
                items = body.objects.len(),
                total = ?meta.as_ref().and_then(|m| m.total_count),
                "Fetched search page"
            );
            results.extend(body.objects);

            match meta.and_then(|m| m.next).filter(|next| !next.is_empty()) {
                Some(next) => url = self.session.url(&next)?,
                None => break,
            }
        }

        for measurement in &results {
            self.registry.observe(&measurement.id, measurement.state());
        }
        info!(pages = pages, measurements = results.len(), "Search finished");
        Ok(results)
    }

    /// Fetch one measurement. `None` when SCC does not know the id.
    pub async fn get_measurement(&self, id: &str) -> Result<Option<MeasurementInfo>> {
        self.require_login()?;
        let url = self.session.url(&format!("{}{}/", MEASUREMENTS_API, id))?;
        match self.get(&url).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(SccError::Rejected {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Refresh the state of `id` from the service.
    #[instrument(skip(self))]
    pub async fn poll(&self, id: &str) -> Result<MeasurementState> {
        match self.get_measurement(id).await? {
            Some(info) => {
                let state = self.registry.observe(id, info.state());
                debug!(state = %state, "Polled measurement");
                Ok(state)
            }
            None => Err(SccError::NotFound(id.to_string())),
        }
    }

    /// Poll until processing is DONE or FAILED.
    ///
    /// A measurement that is not yet visible right after upload counts as a
    /// pending poll.
    #[instrument(skip(self, interval))]
    pub async fn wait_for_completion(
        &self,
        id: &str,
        interval: Duration,
        max_polls: u32,
    ) -> Result<MeasurementState> {
        let mut last = self.registry.state(id).unwrap_or(MeasurementState::Submitted);
        for poll in 1..=max_polls {
            match self.poll(id).await {
                Ok(state) if state.is_settled() => {
                    info!(state = %state, polls = poll, "Processing finished");
                    return Ok(state);
                }
                Ok(state) if state.is_terminal() => {
                    return Err(SccError::NotReady {
                        id: id.to_string(),
                        state,
                    })
                }
                Ok(state) => last = state,
                Err(SccError::NotFound(_)) => debug!("Measurement not visible yet"),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(interval).await;
        }
        Err(SccError::NotReady {
            id: id.to_string(),
            state: last,
        })
    }

    async fn sounding_on_scc(&self, file_name: &str) -> Result<bool> {
        let mut url = self.session.url(SOUNDINGS_API)?;
        url.query_pairs_mut().append_pair("filename", file_name);
        let body: ListResponse<AncillaryFile> = self.get(&url).await?.json().await?;
        Ok(match body.objects.first() {
            Some(file) => {
                debug!(id = ?file.id, file = %file.filename, status = %file.status, "Sounding known to SCC");
                file.already_on_scc()
            }
            None => false,
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Upload an artifact and return the measurement id SCC assigned.
    ///
    /// A second upload of an id this client already saw submitted is rejected
    /// before any request is made.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn upload(&self, path: &Path) -> Result<String> {
        self.require_login()?;
        let request = UploadRequest::read(path).await?;

        let transition = self.registry.begin(&request.id, Event::Upload)?;
        let id = self.submit(&request).await?;
        if id != request.id {
            warn!(expected = %request.id, assigned = %id, "SCC assigned a different measurement id");
        }
        transition.commit();

        info!(id = %id, system = request.system_id, "Uploaded measurement");
        Ok(id)
    }

    async fn submit(&self, request: &UploadRequest) -> Result<String> {
        let url = self.session.url(UPLOAD_PATH)?;
        let page = self.get(&url).await?;
        let csrf = self.csrf_token(&page)?;

        let mut sounding = request.sounding.as_ref();
        if let Some((name, _)) = sounding {
            if self.sounding_on_scc(name).await? {
                warn!(file = %name, "Sounding file already on SCC, not uploading it again");
                sounding = None;
            }
        }

        let response = self
            .send(RetryOn::ConnectOnly, || {
                let mut form = Form::new()
                    .text("system", request.system_id.to_string())
                    .part(
                        "data",
                        Part::bytes(request.data.to_vec()).file_name(request.file_name.clone()),
                    );
                if let Some((name, bytes)) = sounding {
                    form = form.part(
                        "sounding_file",
                        Part::bytes(bytes.to_vec()).file_name(name.clone()),
                    );
                }
                self.session
                    .request(Method::POST, url.clone())
                    .header("X-CSRFToken", csrf.as_str())
                    .header(REFERER, url.as_str())
                    .multipart(form)
            })
            .await?;

        // Success redirects to the measurement page; a rejected form is
        // rendered again at the upload URL.
        let rejected = response.url().path() == url.path();
        let body = response.text().await?;
        if rejected {
            return Err(SccError::Rejected {
                status: None,
                message: format!("upload of {} rejected: {}", request.id, form_errors(&body)),
            });
        }

        let pattern =
            Regex::new(MEASUREMENT_ID_PATTERN).map_err(|e| SccError::InvalidResponse(e.to_string()))?;
        pattern
            .captures(&body)
            .map(|c| c["id"].to_string())
            .ok_or_else(|| {
                SccError::InvalidResponse(
                    "upload accepted but the measurement id is missing from the response".to_string(),
                )
            })
    }

    /// Upload every artifact with at most `max_concurrent_uploads` in
    /// flight. Once `cancel` fires no new upload starts. Outcomes are
    /// returned in input order.
    pub async fn upload_all(&self, paths: &[PathBuf], cancel: &CancellationToken) -> Vec<UploadOutcome> {
        let limit = self.config.max_concurrent_uploads.max(1);
        let mut outcomes: Vec<(usize, UploadOutcome)> = stream::iter(paths.iter().cloned().enumerate())
            .map(|(index, path)| async move {
                let result = if cancel.is_cancelled() {
                    Err(SccError::Cancelled)
                } else {
                    self.upload(&path).await
                };
                if let Err(e) = &result {
                    warn!(path = %path.display(), error = %e, "Upload failed");
                }
                (index, UploadOutcome { path, result })
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Reprocess a DONE or FAILED measurement.
    #[instrument(skip(self))]
    pub async fn rerun(&self, id: &str) -> Result<MeasurementState> {
        self.poll(id).await?;
        let transition = self.registry.begin(id, Event::Rerun)?;

        let url = self
            .session
            .url(&format!("data_processing/measurements/{}/rerun-all/", id))?;
        self.get(&url).await?;

        let state = transition.commit();
        info!(id = %id, "Rerun requested");
        Ok(state)
    }

    /// Delete a measurement from SCC.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.poll(id).await?;
        let transition = self.registry.begin(id, Event::Delete)?;

        let url = self
            .session
            .url(&format!("admin/database/measurements/{}/delete/", id))?;
        let page = self.get(&url).await?;
        let csrf = self.csrf_token(&page)?;
        self.send(RetryOn::Transient, || {
            self.session
                .request(Method::POST, url.clone())
                .header("X-CSRFToken", csrf.as_str())
                .header(REFERER, url.as_str())
                .form(&[("post", "yes")])
        })
        .await?;

        transition.commit();
        info!(id = %id, "Deleted measurement");
        Ok(())
    }

    // ========================================================================
    // Products
    // ========================================================================

    /// Download every available product of a DONE measurement into
    /// `<output_dir>/<id>/<product>/`. A failing product is logged and skipped.
    #[instrument(skip(self, output_dir))]
    pub async fn download(&self, id: &str, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let info = self
            .get_measurement(id)
            .await?
            .ok_or_else(|| SccError::NotFound(id.to_string()))?;
        let state = self.registry.observe(id, info.state());
        if state != MeasurementState::Done {
            return Err(SccError::NotReady {
                id: id.to_string(),
                state,
            });
        }

        let mut files = Vec::new();
        for product in info.available_products() {
            match self.download_product(id, product, output_dir).await {
                Ok(extracted) => files.extend(extracted),
                Err(e) => warn!(product = %product, error = %e, "Product download failed, skipping"),
            }
        }
        info!(files = files.len(), "Downloaded products");
        Ok(files)
    }

    async fn download_product(&self, id: &str, product: Product, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let url = self.session.url(&format!(
            "data_processing/measurements/{}/download-{}/",
            id,
            product.url_segment()
        ))?;
        let archive = self.get(&url).await?.bytes().await?;

        let directory = output_dir.join(id).join(product.directory());
        tokio::task::spawn_blocking(move || extract_archive(&archive, &directory))
            .await
            .map_err(|e| SccError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }

    /// Upload, wait for processing and download the products.
    pub async fn process(&self, path: &Path, output_dir: &Path) -> Result<(String, Vec<PathBuf>)> {
        let id = self.upload(path).await?;
        let state = self
            .wait_for_completion(&id, self.config.poll_interval, self.config.max_polls)
            .await?;
        if state == MeasurementState::Failed {
            return Err(SccError::Rejected {
                status: None,
                message: format!("processing of {} failed", id),
            });
        }
        let files = self.download(&id, output_dir).await?;
        Ok((id, files))
    }
}

/// Extract a product archive, flattening directories inside it.
pub(crate) fn extract_archive(archive: &[u8], directory: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(directory)?;
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;

    let mut written = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name())
            .map(|n| n.to_owned())
        else {
            warn!(entry = %entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let path = directory.join(name);
        let mut file = std::fs::File::create(&path)?;
        io::copy(&mut entry, &mut file)?;
        written.push(path);
    }
    Ok(written)
}

/// Text of Django form errors, or a hint when none are present.
fn form_errors(body: &str) -> String {
    let errors = Regex::new(r#"(?s)<ul class="errorlist[^"]*">(.*?)</ul>"#)
        .ok()
        .and_then(|re| re.captures(body).map(|c| c[1].to_string()));
    match errors {
        Some(html) => {
            let text = Regex::new(r"<[^>]+>")
                .map(|tags| tags.replace_all(&html, " ").into_owned())
                .unwrap_or(html);
            text.split_whitespace().collect::<Vec<_>>().join(" ")
        }
        None => "no reason given, try uploading manually to see the error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, data) in entries {
                writer
                    .start_file(*name, zip::write::FileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_extract_flattens_directories() {
        let dir = tempfile::tempdir().unwrap();
        let archive = zip_bytes(&[("a/b/profile.nc", b"one"), ("top.nc", b"two")]);

        let files = extract_archive(&archive, &dir.path().join("elpp")).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("elpp/profile.nc")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("elpp/top.nc")).unwrap(), b"two");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_archive(b"not a zip", dir.path()),
            Err(SccError::Archive(_))
        ));
    }

    #[test]
    fn test_form_errors() {
        let body = r#"<form><ul class="errorlist"><li>System <b>590</b> is not valid</li></ul></form>"#;
        assert_eq!(form_errors(body), "System 590 is not valid");
        assert!(form_errors("<html></html>").contains("manually"));
    }

    #[test]
    fn test_measurement_id_pattern() {
        let re = Regex::new(MEASUREMENT_ID_PATTERN).unwrap();
        let body = "<h3>Measurement ABC2023050108000830 <small>uploaded</small></h3>";
        assert_eq!(&re.captures(body).unwrap()["id"], "ABC2023050108000830");
    }
}

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::models::{AgentSettings, DeviceReport, DownloadLog};
use crate::utils::{AppError, AppResult};

/// The fleet collector: receives check-ins and download outcomes.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Returns the collector's response body on success.
    async fn save_device(&self, report: &DeviceReport) -> AppResult<String>;
    async fn log_download(&self, log: &DownloadLog) -> AppResult<String>;
}

/// Collector reached over HTTP with form-encoded POSTs.
pub struct HttpCollector {
    client: Client,
    report_url: String,
    download_log_url: String,
}

impl HttpCollector {
    pub fn new(client: Client, settings: &AgentSettings) -> Self {
        Self {
            client,
            report_url: settings.report_url(),
            download_log_url: settings.download_log_url(),
        }
    }

    async fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> AppResult<String> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Collector {
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn save_device(&self, report: &DeviceReport) -> AppResult<String> {
        self.post_form(
            &self.report_url,
            &[
                ("device_name", report.device_name.as_str()),
                ("ip_address", report.ip_address.as_str()),
                ("last_reboot", report.last_reboot.as_str()),
            ],
        )
        .await
    }

    async fn log_download(&self, log: &DownloadLog) -> AppResult<String> {
        self.post_form(
            &self.download_log_url,
            &[
                ("file_name", log.file_name.as_str()),
                ("download_status", log.download_status.as_str()),
                ("timestamp", log.timestamp.as_str()),
                ("details", log.details.as_str()),
                ("device_name", log.device_name.as_str()),
                ("ip_address", log.ip_address.as_str()),
            ],
        )
        .await
    }
}

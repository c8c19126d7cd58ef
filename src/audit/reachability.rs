use std::collections::HashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::AuditTarget;
use crate::browser::{
    release, BrowserLauncher, BrowserSession, CapturedResponse, FrameInfo, FrameRef, NavigateOptions,
    ResourceType, ResponseCapture, WaitUntil,
};
use crate::cli::config::ReachabilitySettings;
use crate::error::Result;

/// A child frame whose document came back 404
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameFailure {
    pub frame_url: String,
    pub status: u16,
}

/// A non-document resource inside a child frame that came back 404
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFailure {
    pub url: String,
    pub resource_type: ResourceType,
    pub frame_url: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSummary {
    pub url: String,
    pub name: String,
    pub title: String,
    pub has_error: bool,
}

/// Reachability of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityResult {
    pub url: String,
    /// None when navigation failed outright
    pub main_status: Option<u16>,
    pub frame_failures: Vec<FrameFailure>,
    pub asset_failures: Vec<AssetFailure>,
    pub frames: Vec<FrameSummary>,
    pub problematic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReachabilityResult {
    fn new(url: &str, classified: Classified, frames: Vec<FrameSummary>, error: Option<String>) -> Self {
        let problematic = is_broken_status(classified.main_status)
            || !classified.frame_failures.is_empty()
            || !classified.asset_failures.is_empty();

        Self {
            url: url.to_string(),
            main_status: classified.main_status,
            frame_failures: classified.frame_failures,
            asset_failures: classified.asset_failures,
            frames,
            problematic,
            error,
        }
    }

    fn unreachable(url: &str, error: impl Into<String>) -> Self {
        Self::new(url, Classified::default(), Vec::new(), Some(error.into()))
    }
}

/// Results of a reachability batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityReport {
    pub category: String,
    pub results: Vec<ReachabilityResult>,
}

/// Statuses that make a page broken no matter what its frames did
pub fn is_broken_status(status: Option<u16>) -> bool {
    matches!(status, None | Some(0) | Some(404) | Some(500))
}

/// Main status and 404 failures derived from the responses of one load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub main_status: Option<u16>,
    pub frame_failures: Vec<FrameFailure>,
    pub asset_failures: Vec<AssetFailure>,
}

/// Classify responses in emission order.
///
/// The last main-frame document sets the main status; `fallback_status`
/// is used when none was observed. Subresources of the main frame never
/// touch it. Only 404s inside child frames are failures, each URL once.
pub fn classify_responses(responses: &[CapturedResponse], fallback_status: Option<u16>) -> Classified {
    let mut classified = Classified::default();
    let mut seen_404 = HashSet::new();

    for response in responses {
        match &response.frame {
            FrameRef::Main => {
                if response.resource_type == ResourceType::Document {
                    classified.main_status = Some(response.status);
                }
                continue;
            }
            // Workers and other requests not owned by any frame
            FrameRef::Unattributed => continue,
            FrameRef::Child { .. } | FrameRef::Detached => {}
        }

        if response.status != 404 || !seen_404.insert(response.url.as_str()) {
            continue;
        }

        let frame_url = response.frame.url().unwrap_or(&response.url).to_string();
        if response.resource_type == ResourceType::Document {
            classified.frame_failures.push(FrameFailure {
                frame_url,
                status: response.status,
            });
        } else {
            classified.asset_failures.push(AssetFailure {
                url: response.url.clone(),
                resource_type: response.resource_type,
                frame_url,
                status: response.status,
            });
        }
    }

    if classified.main_status.is_none() {
        classified.main_status = fallback_status;
    }
    classified
}

/// Child frames with their failure flag
pub fn summarize_frames(frames: &[FrameInfo], failures: &[FrameFailure]) -> Vec<FrameSummary> {
    frames
        .iter()
        .filter(|frame| !frame.is_main())
        .map(|frame| FrameSummary {
            url: frame.url.clone(),
            name: frame.name.clone(),
            title: frame.title.clone(),
            has_error: failures.iter().any(|f| f.frame_url == frame.url),
        })
        .collect()
}

/// Checks that targets and their embedded frames load
pub struct ReachabilityChecker {
    config: ReachabilitySettings,
}

impl ReachabilityChecker {
    pub fn new(config: ReachabilitySettings) -> Self {
        Self { config }
    }

    pub async fn run(&self, launcher: &dyn BrowserLauncher, targets: &[AuditTarget]) -> Result<ReachabilityReport> {
        info!("Checking reachability of {} targets", targets.len());

        let session = launcher.launch().await?;

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self.check_target(session.as_ref(), target).await;
            if result.problematic {
                warn!("{} is problematic (status {:?})", result.url, result.main_status);
            }
            results.push(result);
        }

        release("reachability browser session", session.close()).await;

        let category = targets
            .iter()
            .find_map(|t| t.category.clone())
            .unwrap_or_else(|| self.config.default_category.clone());

        Ok(ReachabilityReport { category, results })
    }

    async fn check_target(&self, session: &dyn BrowserSession, target: &AuditTarget) -> ReachabilityResult {
        let url = target.as_str();

        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => return ReachabilityResult::unreachable(url, e.to_string()),
        };

        let options = NavigateOptions::new(
            WaitUntil::DomContentLoaded,
            self.config.navigation_timeout_ms,
            self.config.settle_ms,
        );
        let mut capture = ResponseCapture::new();

        let (goto_status, error) = match page.goto(url, &options, &mut capture).await {
            Ok(status) => (status, None),
            Err(e) => {
                debug!("Navigation to {} failed: {}", url, e);
                (None, Some(e.to_string()))
            }
        };

        let classified = classify_responses(&capture.take(), goto_status);

        let frames = match page.frames().await {
            Ok(frames) => summarize_frames(&frames, &classified.frame_failures),
            Err(e) => {
                debug!("Could not list frames of {}: {}", url, e);
                Vec::new()
            }
        };

        release("reachability page", page.close()).await;

        ReachabilityResult::new(url, classified, frames, error)
    }
}

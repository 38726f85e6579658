//! Subject analysis: where is the interesting part of an image?
//!
//! A [`SubjectAnalyzer`] returns a [`SubjectHint`] or an error. Callers go
//! through [`analyze_subject`], which bounds the call with a timeout and
//! turns every failure into `None`. Analysis is best-effort and never fails
//! a job.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Subject rectangle in percent of the source dimensions (0..=100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Midpoint, in percent.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// A box is usable when it has area and its midpoint lies in the image.
    pub fn is_usable(&self) -> bool {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return false;
        }
        let (cx, cy) = self.center();
        (0.0..=100.0).contains(&cx) && (0.0..=100.0).contains(&cy)
    }
}

/// Point of interest in percent of the source dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub x: f64,
    pub y: f64,
}

/// What a vision service reported about an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectHint {
    #[serde(default, alias = "boundingBox")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, alias = "focalPoint")]
    pub focal_point: Option<FocalPoint>,
    #[serde(default, alias = "mainSubject")]
    pub main_subject: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl SubjectHint {
    /// The bounding box, if present and usable.
    pub fn usable_box(&self) -> Option<BoundingBox> {
        self.bounding_box.filter(BoundingBox::is_usable)
    }

    /// Whether the hint carries anything the crop resolver can use.
    pub fn is_usable(&self) -> bool {
        self.usable_box().is_some()
            || self
                .focal_point
                .is_some_and(|p| (0.0..=100.0).contains(&p.x) && (0.0..=100.0).contains(&p.y))
    }
}

impl SubjectHint {
    /// Fold the hints of several frames of one video into a single static
    /// hint. Each coordinate is the median over the usable hints, so one
    /// frame with a stray detection does not drag the crop.
    pub fn combine(hints: &[SubjectHint]) -> Option<SubjectHint> {
        let usable: Vec<&SubjectHint> = hints.iter().filter(|h| h.is_usable()).collect();
        match usable.as_slice() {
            [] => return None,
            [only] => return Some((*only).clone()),
            _ => {}
        }

        let boxes: Vec<BoundingBox> = usable.iter().filter_map(|h| h.usable_box()).collect();
        let bounding_box = (!boxes.is_empty()).then(|| {
            let cx = median(boxes.iter().map(|b| b.center().0).collect());
            let cy = median(boxes.iter().map(|b| b.center().1).collect());
            let width = median(boxes.iter().map(|b| b.width).collect());
            let height = median(boxes.iter().map(|b| b.height).collect());
            BoundingBox {
                x: cx - width / 2.0,
                y: cy - height / 2.0,
                width,
                height,
            }
        });

        let points: Vec<FocalPoint> = usable
            .iter()
            .filter_map(|h| h.focal_point)
            .filter(|p| (0.0..=100.0).contains(&p.x) && (0.0..=100.0).contains(&p.y))
            .collect();
        let focal_point = (!points.is_empty()).then(|| FocalPoint {
            x: median(points.iter().map(|p| p.x).collect()),
            y: median(points.iter().map(|p| p.y).collect()),
        });

        let main_subject = usable
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .and_then(|h| h.main_subject.clone());
        let confidence = usable.iter().map(|h| h.confidence).sum::<f64>() / usable.len() as f64;

        Some(SubjectHint {
            bounding_box,
            focal_point,
            main_subject,
            confidence,
        })
    }
}

/// Median of a non-empty list.
fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// A vision capability that locates the main subject of an image.
#[async_trait]
pub trait SubjectAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Analyze encoded image bytes. Failures are [`rf_core::Error::Analysis`].
    async fn analyze(&self, image: &[u8], mime_type: &str) -> rf_core::Result<SubjectHint>;
}

/// Call `analyzer` under `timeout`, swallowing every failure.
pub async fn analyze_subject(
    analyzer: &dyn SubjectAnalyzer,
    image: &[u8],
    mime_type: &str,
    timeout: Duration,
) -> Option<SubjectHint> {
    match tokio::time::timeout(timeout, analyzer.analyze(image, mime_type)).await {
        Ok(Ok(hint)) if hint.is_usable() => {
            tracing::debug!(
                analyzer = analyzer.name(),
                subject = hint.main_subject.as_deref().unwrap_or("unknown"),
                confidence = hint.confidence,
                "subject hint obtained"
            );
            Some(hint)
        }
        Ok(Ok(_)) => {
            tracing::debug!(analyzer = analyzer.name(), "analysis returned no usable subject");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(analyzer = analyzer.name(), error = %e, "subject analysis failed");
            None
        }
        Err(_) => {
            tracing::warn!(analyzer = analyzer.name(), ?timeout, "subject analysis timed out");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// NoopAnalyzer
// ---------------------------------------------------------------------------

/// Analyzer used when analysis is disabled. Reports an empty hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyzer;

#[async_trait]
impl SubjectAnalyzer for NoopAnalyzer {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn analyze(&self, _image: &[u8], _mime_type: &str) -> rf_core::Result<SubjectHint> {
        Ok(SubjectHint::default())
    }
}

// ---------------------------------------------------------------------------
// HttpVisionAnalyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image: String,
    mime_type: &'a str,
}

/// Vision service reached over HTTP.
///
/// POSTs `{"image": <base64>, "mime_type": ...}` and expects a
/// [`SubjectHint`] JSON body. Both snake_case and camelCase field names are
/// accepted.
#[derive(Debug, Clone)]
pub struct HttpVisionAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpVisionAnalyzer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Build from config. Returns `None` when analysis is disabled or has no
    /// endpoint.
    pub fn from_config(config: &rf_core::config::AnalysisConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let endpoint = config.endpoint.clone()?;
        Some(Self::new(endpoint, config.api_key.clone()))
    }
}

#[async_trait]
impl SubjectAnalyzer for HttpVisionAnalyzer {
    fn name(&self) -> &'static str {
        "http-vision"
    }

    async fn analyze(&self, image: &[u8], mime_type: &str) -> rf_core::Result<SubjectHint> {
        let body = AnalyzeRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            mime_type,
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| rf_core::Error::Analysis(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(rf_core::Error::Analysis(format!(
                "vision service returned {status}"
            )));
        }

        resp.json::<SubjectHint>()
            .await
            .map_err(|e| rf_core::Error::Analysis(format!("malformed response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn box_usability() {
        let good = BoundingBox { x: 10.0, y: 10.0, width: 30.0, height: 40.0 };
        assert!(good.is_usable());
        assert_eq!(good.center(), (25.0, 30.0));

        let flat = BoundingBox { width: 0.0, ..good };
        assert!(!flat.is_usable());

        let outside = BoundingBox { x: 150.0, ..good };
        assert!(!outside.is_usable());

        let nan = BoundingBox { y: f64::NAN, ..good };
        assert!(!nan.is_usable());
    }

    #[test]
    fn hint_accepts_camel_case() {
        let hint: SubjectHint = serde_json::from_str(
            r#"{"boundingBox": {"x": 20, "y": 10, "width": 40, "height": 50},
                "mainSubject": "dog", "confidence": 0.8}"#,
        )
        .unwrap();
        assert_eq!(hint.main_subject.as_deref(), Some("dog"));
        assert!(hint.usable_box().is_some());
    }

    #[test]
    fn focal_point_alone_is_usable() {
        let hint = SubjectHint {
            bounding_box: None,
            focal_point: Some(FocalPoint { x: 30.0, y: 70.0 }),
            main_subject: None,
            confidence: 0.5,
        };
        assert!(hint.is_usable());
    }

    fn boxed(x: f64, confidence: f64, subject: &str) -> SubjectHint {
        SubjectHint {
            bounding_box: Some(BoundingBox { x, y: 20.0, width: 20.0, height: 40.0 }),
            focal_point: None,
            main_subject: Some(subject.into()),
            confidence,
        }
    }

    #[test]
    fn combined_hint_takes_the_median_position() {
        let hints = [
            boxed(60.0, 0.5, "person"),
            boxed(64.0, 0.9, "speaker"),
            // A stray detection on the far left.
            boxed(0.0, 0.4, "lamp"),
            SubjectHint::default(),
        ];
        let combined = SubjectHint::combine(&hints).unwrap();
        let bbox = combined.usable_box().unwrap();
        assert_eq!(bbox.center(), (70.0, 40.0));
        assert_eq!(combined.main_subject.as_deref(), Some("speaker"));
        assert!((combined.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn combining_nothing_usable_is_none() {
        assert!(SubjectHint::combine(&[]).is_none());
        assert!(SubjectHint::combine(&[SubjectHint::default()]).is_none());
    }

    #[test]
    fn single_hint_combines_to_itself() {
        let hint = boxed(10.0, 0.7, "cat");
        assert_eq!(SubjectHint::combine(&[hint.clone()]), Some(hint));
    }

    #[tokio::test]
    async fn noop_degrades_to_none() {
        let hint = analyze_subject(&NoopAnalyzer, b"img", "image/jpeg", Duration::from_secs(1)).await;
        assert!(hint.is_none());
    }

    #[tokio::test]
    async fn http_analyzer_parses_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bounding_box": {"x": 40, "y": 20, "width": 20, "height": 30},
                "main_subject": "person",
                "confidence": 0.92
            })))
            .mount(&server)
            .await;

        let analyzer =
            HttpVisionAnalyzer::new(format!("{}/analyze", server.uri()), Some("secret".into()));
        let hint = analyze_subject(&analyzer, b"img", "image/png", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(hint.usable_box().unwrap().center(), (50.0, 35.0));
    }

    #[tokio::test]
    async fn http_error_status_degrades_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let analyzer = HttpVisionAnalyzer::new(server.uri(), None);
        assert!(analyzer.analyze(b"img", "image/png").await.is_err());
        assert!(
            analyze_subject(&analyzer, b"img", "image/png", Duration::from_secs(5))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn malformed_body_degrades_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let analyzer = HttpVisionAnalyzer::new(server.uri(), None);
        let hint = analyze_subject(&analyzer, b"img", "image/png", Duration::from_secs(5)).await;
        assert!(hint.is_none());
    }

    #[tokio::test]
    async fn slow_service_times_out_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({"confidence": 1.0})),
            )
            .mount(&server)
            .await;

        let analyzer = HttpVisionAnalyzer::new(server.uri(), None);
        let hint =
            analyze_subject(&analyzer, b"img", "image/png", Duration::from_millis(100)).await;
        assert!(hint.is_none());
    }

    #[test]
    fn from_config_requires_enabled_and_endpoint() {
        let mut cfg = rf_core::config::AnalysisConfig::default();
        assert!(HttpVisionAnalyzer::from_config(&cfg).is_none());
        cfg.enabled = true;
        assert!(HttpVisionAnalyzer::from_config(&cfg).is_none());
        cfg.endpoint = Some("http://vision.local/analyze".into());
        assert!(HttpVisionAnalyzer::from_config(&cfg).is_some());
    }
}

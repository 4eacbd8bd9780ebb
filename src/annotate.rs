// Jarvis Engine — Image Annotation
// Asks the model for bounding boxes over an uploaded image and scales its
// normalized `[label, ymin, xmin, ymax, xmax]` lines to pixel rectangles.
// Annotation is decorative: any failure yields no boxes, never an error.

use log::warn;

use crate::error::{EngineError, EngineResult};
use crate::image::PendingImage;
use crate::session::ChatSession;
use crate::types::{BoundingBox, MessagePart};

/// Fixed instruction sent with the image.
pub const ANNOTATION_PROMPT: &str = "Return bounding box coordinates for all visible objects \
in the format: [object_name, ymin, xmin, ymax, xmax]. Only return the coordinates, no other text.";

/// Detect objects in `image` and map them to pixel rectangles over the
/// rendered dimensions. Failures are logged and absorbed.
pub async fn annotate(
    session: &ChatSession,
    image: &PendingImage,
    rendered_width: u32,
    rendered_height: u32,
) -> Vec<BoundingBox> {
    match request_annotations(session, image, rendered_width, rendered_height).await {
        Ok(boxes) => boxes,
        Err(e) => {
            warn!("[engine] Annotation failed, returning no boxes: {e}");
            Vec::new()
        }
    }
}

async fn request_annotations(
    session: &ChatSession,
    image: &PendingImage,
    rendered_width: u32,
    rendered_height: u32,
) -> EngineResult<Vec<BoundingBox>> {
    let parts = vec![
        image.to_part(),
        MessagePart::Text(ANNOTATION_PROMPT.into()),
    ];
    let text = session
        .send_once(&parts)
        .await
        .map_err(|e| EngineError::Annotation(e.to_string()))?;
    Ok(parse_bounding_boxes(&text, rendered_width, rendered_height))
}

/// Parse the model's response, one candidate box per line. Lines that do not
/// fit the five-field shape are dropped silently — the model pads its answer
/// with prose often enough that this is the normal case, not an error.
pub fn parse_bounding_boxes(
    text: &str,
    rendered_width: u32,
    rendered_height: u32,
) -> Vec<BoundingBox> {
    let (w, h) = (f64::from(rendered_width), f64::from(rendered_height));
    text.lines().filter_map(|line| parse_line(line, w, h)).collect()
}

fn parse_line(line: &str, w: f64, h: f64) -> Option<BoundingBox> {
    let line = line.trim();
    let line = line.strip_prefix('[').unwrap_or(line);
    let line = line.strip_suffix(']').unwrap_or(line);

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 5 {
        return None;
    }
    let label = fields[0].trim_matches(['"', '\'']).to_string();
    if label.is_empty() {
        return None;
    }
    let ymin: f64 = fields[1].parse().ok()?;
    let xmin: f64 = fields[2].parse().ok()?;
    let ymax: f64 = fields[3].parse().ok()?;
    let xmax: f64 = fields[4].parse().ok()?;

    Some(BoundingBox {
        label,
        top: ymin * h,
        left: xmin * w,
        width: (xmax - xmin) * w,
        height: (ymax - ymin) * h,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::credentials::Credential;
    use crate::provider::{
        ChunkStream, GenerativeProvider, ProviderError, ProviderFactory,
    };
    use crate::session::initialize_session;
    use crate::types::ChatTurn;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn scales_normalized_coordinates_to_pixels() {
        let boxes = parse_bounding_boxes("cat, 0.1, 0.2, 0.5, 0.4", 200, 100);
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!(b.label, "cat");
        assert!(close(b.top, 10.0));
        assert!(close(b.left, 40.0));
        assert!(close(b.height, 40.0));
        assert!(close(b.width, 40.0));
    }

    #[test]
    fn accepts_bracketed_lines() {
        let boxes = parse_bounding_boxes("[dog, 0.0, 0.0, 1.0, 1.0]", 640, 480);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].label, "dog");
        assert!(close(boxes[0].width, 640.0));
        assert!(close(boxes[0].height, 480.0));
    }

    #[test]
    fn drops_malformed_lines_and_keeps_the_rest() {
        let text = "Here are the objects I found:\n\
                    cat, 0.1, 0.2, 0.5, 0.4\n\
                    not a box\n\
                    dog, 0.2, oops, 0.6, 0.8\n\
                    bird, 0.0, 0.5, 0.25, 1.0\n\
                    too, 0.1, 0.2, 0.3\n";
        let boxes = parse_bounding_boxes(text, 100, 100);
        let labels: Vec<&str> = boxes.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["cat", "bird"]);
    }

    #[test]
    fn empty_response_yields_no_boxes() {
        assert!(parse_bounding_boxes("", 100, 100).is_empty());
        assert!(parse_bounding_boxes("No objects detected.", 100, 100).is_empty());
    }

    // ── Pipeline fakes ─────────────────────────────────────────────────

    struct ScriptedGen {
        script: Mutex<VecDeque<Result<String, String>>>,
    }

    #[async_trait]
    impl GenerativeProvider for ScriptedGen {
        async fn generate(
            &self,
            _history: &[ChatTurn],
            _parts: &[MessagePart],
        ) -> Result<String, ProviderError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(ProviderError::Transport(msg)),
                None => Err(ProviderError::Transport("script exhausted".into())),
            }
        }

        async fn generate_stream(
            &self,
            _history: &[ChatTurn],
            _parts: &[MessagePart],
        ) -> Result<ChunkStream, ProviderError> {
            Err(ProviderError::Transport("not used".into()))
        }
    }

    struct OneFactory(Arc<ScriptedGen>);

    impl ProviderFactory for OneFactory {
        fn create(&self, _credential: &Credential) -> Arc<dyn GenerativeProvider> {
            self.0.clone()
        }
    }

    async fn session_with(script: Vec<Result<&str, &str>>) -> ChatSession {
        let provider = Arc::new(ScriptedGen {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
        });
        initialize_session(&OneFactory(provider), &Credential::new("k1"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn annotate_returns_scaled_boxes() {
        let session = session_with(vec![Ok("ready"), Ok("cat, 0.1, 0.2, 0.5, 0.4")]).await;
        let image = PendingImage::new(b"pixels", "image/png").unwrap();

        let boxes = annotate(&session, &image, 200, 100).await;
        assert_eq!(boxes.len(), 1);
        assert!(close(boxes[0].top, 10.0));
    }

    #[tokio::test]
    async fn annotate_absorbs_provider_failure() {
        let session = session_with(vec![Ok("ready"), Err("boom")]).await;
        let image = PendingImage::new(b"pixels", "image/png").unwrap();

        let boxes = annotate(&session, &image, 200, 100).await;
        assert!(boxes.is_empty());
    }
}

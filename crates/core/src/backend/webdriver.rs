//! DOM backend speaking the W3C WebDriver wire protocol to an already
//! running browser session.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{ConfigError, DispatchError, ProbeError};
use crate::logger;
use crate::targets::{Locator, TargetSpec};
use crate::types::{Bounds, SearchRegion, Size};
use super::{Hit, SurfaceBackend};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const FORCE_CLICK_SCRIPT: &str =
    "arguments[0].scrollIntoView({block: 'center', inline: 'center'}); arguments[0].click();";

/// A failed wire command.
#[derive(Debug)]
enum WireError {
    /// The driver answered with a WebDriver error object.
    Remote { error: String, message: String },
    Transport(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Remote { error, message } => write!(f, "{}: {}", error, message),
            WireError::Transport(msg) => write!(f, "{}", msg),
        }
    }
}

fn remote_error(body: &Value) -> WireError {
    let value = &body["value"];
    WireError::Remote {
        error: value["error"].as_str().unwrap_or("unknown error").to_string(),
        message: value["message"].as_str().unwrap_or_default().to_string(),
    }
}

/// Element ids from a Find Elements response value.
fn element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r[ELEMENT_KEY].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn rect_bounds(value: &Value) -> Option<Bounds> {
    let num = |k: &str| value[k].as_f64();
    let (w, h) = (num("width")?, num("height")?);
    if w < 1.0 || h < 1.0 {
        return None;
    }
    Some(Bounds::new(num("x")?.round() as i32, num("y")?.round() as i32, w.round() as u32, h.round() as u32))
}

fn classify_click_error(err: WireError) -> DispatchError {
    match &err {
        WireError::Remote { error, .. }
            if error == "element not interactable" || error == "element click intercepted" =>
        {
            DispatchError::Blocked(err.to_string())
        }
        _ => DispatchError::Failed(err.to_string()),
    }
}

fn is_stale(err: &WireError) -> bool {
    matches!(err, WireError::Remote { error, .. } if error == "stale element reference" || error == "no such element")
}

pub struct WebDriverBackend {
    agent: ureq::Agent,
    session_url: String,
    viewport: Option<Size>,
}

impl WebDriverBackend {
    /// Attach to `session` on the driver at `url`.
    pub fn connect(url: &str, session: Option<&str>, timeout: Duration) -> Result<Self, ConfigError> {
        let session = session.map(str::trim).filter(|s| !s.is_empty()).ok_or(ConfigError::Invalid {
            field: "webdriver_session",
            reason: "the webdriver backend needs an existing session id".to_string(),
        })?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let backend = Self {
            agent,
            session_url: format!("{}/session/{}", url.trim_end_matches('/'), session),
            viewport: None,
        };
        let page = backend.command("GET", "/url", None).map_err(|e| ConfigError::Invalid {
            field: "webdriver_url",
            reason: format!("session {} not reachable: {}", session, e),
        })?;
        logger::info_p(
            "webdriver",
            &format!("attached to session {} at {}", session, page.as_str().unwrap_or("?")),
        );
        Ok(backend)
    }

    fn command(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value, WireError> {
        let url = format!("{}{}", self.session_url, path);
        let request = self.agent.request(method, &url);
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match result {
            Ok(resp) => {
                let body: Value = resp.into_json().map_err(|e| WireError::Transport(e.to_string()))?;
                Ok(body["value"].clone())
            }
            Err(ureq::Error::Status(code, resp)) => match resp.into_json::<Value>() {
                Ok(body) => Err(remote_error(&body)),
                Err(_) => Err(WireError::Transport(format!("HTTP {}", code))),
            },
            Err(ureq::Error::Transport(t)) => Err(WireError::Transport(t.to_string())),
        }
    }

    fn execute(&self, script: &str, args: Value) -> Result<Value, WireError> {
        self.command("POST", "/execute/sync", Some(json!({ "script": script, "args": args })))
    }

    fn viewport(&mut self) -> Result<Size, ProbeError> {
        if let Some(size) = self.viewport {
            return Ok(size);
        }
        let value = self
            .execute("return [window.innerWidth, window.innerHeight];", json!([]))
            .map_err(|e| ProbeError::Backend(e.to_string()))?;
        let dim = |i: usize| value[i].as_u64().and_then(|v| u32::try_from(v).ok());
        let size = match (dim(0), dim(1)) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Size::new(w, h),
            _ => return Err(ProbeError::Backend(format!("unexpected viewport size {}", value))),
        };
        self.viewport = Some(size);
        Ok(size)
    }

    /// First displayed element whose center lies in `region`.
    fn first_visible(&self, ids: Vec<String>, region: Option<SearchRegion>) -> Result<Option<Hit>, ProbeError> {
        for id in ids {
            let displayed = match self.command("GET", &format!("/element/{}/displayed", id), None) {
                Ok(v) => v.as_bool().unwrap_or(false),
                Err(e) if is_stale(&e) => continue,
                Err(e) => return Err(ProbeError::Backend(e.to_string())),
            };
            if !displayed {
                continue;
            }
            let rect = match self.command("GET", &format!("/element/{}/rect", id), None) {
                Ok(v) => v,
                Err(e) if is_stale(&e) => continue,
                Err(e) => return Err(ProbeError::Backend(e.to_string())),
            };
            let Some(bounds) = rect_bounds(&rect) else { continue };
            if region.map_or(true, |r| r.contains(bounds.center())) {
                return Ok(Some(Hit::new(bounds, 1.0).with_element(id)));
            }
        }
        Ok(None)
    }

    fn accept_alert(&self) {
        match self.command("POST", "/alert/accept", Some(json!({}))) {
            Ok(_) => logger::info_p("webdriver", "accepted confirmation dialog"),
            Err(WireError::Remote { error, .. }) if error == "no such alert" => {}
            Err(e) => logger::warn_p("webdriver", &format!("alert accept failed: {}", e)),
        }
    }
}

impl SurfaceBackend for WebDriverBackend {
    fn name(&self) -> &'static str {
        "webdriver"
    }

    fn logical_size(&mut self) -> Result<Size, ProbeError> {
        self.viewport()
    }

    fn probe_size(&mut self) -> Result<Size, ProbeError> {
        self.viewport()
    }

    fn locate(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        _confidence: f64,
    ) -> Result<Option<Hit>, ProbeError> {
        let (using, value) = match &target.locator {
            Locator::Css(s) => ("css selector", s),
            Locator::XPath(s) => ("xpath", s),
            Locator::Template(_) => {
                return Err(ProbeError::Backend(format!(
                    "webdriver backend cannot use {} for {}",
                    target.locator, target.name
                )))
            }
        };
        let found = self
            .command("POST", "/elements", Some(json!({ "using": using, "value": value })))
            .map_err(|e| ProbeError::Backend(e.to_string()))?;
        self.first_visible(element_ids(&found), region)
    }

    fn activate(&mut self, hit: &Hit) -> Result<(), DispatchError> {
        let id = hit
            .element
            .as_deref()
            .ok_or_else(|| DispatchError::Failed("hit carries no element handle".to_string()))?;
        self.command("POST", &format!("/element/{}/click", id), Some(json!({})))
            .map_err(classify_click_error)?;
        self.accept_alert();
        Ok(())
    }

    fn force_activate(&mut self, hit: &Hit) -> Result<(), DispatchError> {
        let id = hit
            .element
            .as_deref()
            .ok_or_else(|| DispatchError::Failed("hit carries no element handle".to_string()))?;
        self.execute(FORCE_CLICK_SCRIPT, json!([{ ELEMENT_KEY: id }]))
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        self.accept_alert();
        Ok(())
    }

    fn reset_view(&mut self) {
        if let Err(e) = self.execute("window.scrollTo(0, 0);", json!([])) {
            logger::warn_p("webdriver", &format!("scroll reset failed: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_element_ids() {
        let value = json!([
            { ELEMENT_KEY: "a1" },
            { "other": "x" },
            { ELEMENT_KEY: "b2" },
        ]);
        assert_eq!(element_ids(&value), vec!["a1".to_string(), "b2".to_string()]);
        assert!(element_ids(&json!(null)).is_empty());
    }

    #[test]
    fn rect_rounds_and_rejects_empty() {
        let rect = json!({ "x": 10.4, "y": 20.6, "width": 80.0, "height": 30.2 });
        assert_eq!(rect_bounds(&rect), Some(Bounds::new(10, 21, 80, 30)));
        assert_eq!(rect_bounds(&json!({ "x": 0, "y": 0, "width": 0, "height": 10 })), None);
    }

    #[test]
    fn intercepted_click_is_blocked() {
        let body = json!({ "value": { "error": "element click intercepted", "message": "overlay" } });
        assert!(matches!(classify_click_error(remote_error(&body)), DispatchError::Blocked(_)));

        let body = json!({ "value": { "error": "invalid session id", "message": "" } });
        assert!(matches!(classify_click_error(remote_error(&body)), DispatchError::Failed(_)));
        assert!(matches!(
            classify_click_error(WireError::Transport("refused".into())),
            DispatchError::Failed(_)
        ));
    }

    #[test]
    fn connect_requires_session() {
        let err = WebDriverBackend::connect("http://127.0.0.1:9515", None, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid { field: "webdriver_session", .. }));
    }
}

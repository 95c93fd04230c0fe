use serde_json::Value;

const TITLE_LABEL: &str = "org.opencontainers.image.title";
const VERSION_LABEL: &str = "org.opencontainers.image.version";
const REVISION_LABEL: &str = "org.opencontainers.image.revision";

/// Image build metadata as emitted by docker/metadata-action, surfaced
/// verbatim on `/build-info` and mined for the default Sentry release tag.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    raw: Value,
}

impl BuildInfo {
    /// Metadata for builds that ran outside the image pipeline.
    pub fn empty() -> Self {
        Self {
            raw: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw: Value =
            serde_json::from_str(raw).map_err(|e| format!("must be valid JSON: {e}"))?;
        if !raw.is_object() {
            return Err("must be a JSON object".to_string());
        }
        Ok(Self { raw })
    }

    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    fn label(&self, name: &str) -> Option<&str> {
        self.raw.get("labels")?.get(name)?.as_str()
    }

    /// Release identifier in `image:version@revision` form, with
    /// placeholders where the build metadata carries no such label.
    pub fn default_release(&self) -> String {
        let title = self.label(TITLE_LABEL).unwrap_or("unknown_image");
        let version = self.label(VERSION_LABEL).unwrap_or("unknown_version");
        let revision = self.label(REVISION_LABEL).unwrap_or("unknown_rev");
        format!("{title}:{version}@{revision}")
    }
}

//! The `printer` unit kind.
//!
//! Publishes its resolved `outputs` map without touching any external
//! system. Useful for wiring values between stacks and for dry runs.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::error::{Result, UnitError};

use super::{ExecContext, Unit, UnitDefinition, UnitOutputs};

/// Unit that echoes its resolved outputs.
#[derive(Debug)]
pub struct PrinterUnit {
    def: UnitDefinition,
}

impl PrinterUnit {
    /// Kind name used in configuration.
    pub const KIND: &'static str = "printer";

    /// Creates a printer unit.
    #[must_use]
    pub const fn new(def: UnitDefinition) -> Self {
        Self { def }
    }
}

#[async_trait]
impl Unit for PrinterUnit {
    fn stack(&self) -> &str {
        &self.def.stack
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn spec_data(&self) -> &Value {
        &self.def.data
    }

    fn force_apply(&self) -> bool {
        self.def.force_apply
    }

    fn tainted(&self) -> bool {
        self.def.tainted
    }

    async fn apply(&self, artifact: &Value, ctx: &ExecContext) -> Result<UnitOutputs> {
        if ctx.is_interrupted() {
            return Err(UnitError::Interrupted { unit: self.key() }.into());
        }

        let outputs: UnitOutputs = match artifact.get("outputs") {
            None | Some(Value::Null) => UnitOutputs::new(),
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(other) => {
                return Err(UnitError::build(
                    self.key(),
                    format!("'outputs' must be a map, got {other}"),
                )
                .into());
            }
        };

        for (name, value) in &outputs {
            info!("{}: {name} = {value}", self.key());
        }
        Ok(outputs)
    }

    async fn plan(&self, artifact: &Value, _ctx: &ExecContext) -> Result<String> {
        serde_json::to_string_pretty(artifact)
            .map_err(|e| UnitError::build(self.key(), e.to_string()).into())
    }

    async fn destroy(&self, _artifact: &Value, _ctx: &ExecContext) -> Result<()> {
        info!("{}: nothing to destroy", self.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{Link, LinkRegistry};
    use serde_json::json;

    fn printer(data: Value) -> PrinterUnit {
        PrinterUnit::new(UnitDefinition {
            stack: String::from("infra"),
            name: String::from("echo"),
            kind: String::from(PrinterUnit::KIND),
            force_apply: false,
            tainted: false,
            data,
        })
    }

    #[tokio::test]
    async fn test_apply_publishes_resolved_outputs() {
        let mut links = LinkRegistry::new();
        let mut link = Link::output("infra", "net", "id");
        link.output_data = Some(json!("net-7"));
        let marker = links.set(link).expect("set");

        let unit = printer(json!({ "outputs": { "net": marker, "n": 2 } }));
        let artifact = unit.build(&links).expect("build");
        let outputs = unit
            .apply(&artifact, &ExecContext::default())
            .await
            .expect("apply");

        assert_eq!(outputs.get("net"), Some(&json!("net-7")));
        assert_eq!(outputs.get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_apply_rejects_non_map_outputs() {
        let unit = printer(json!({ "outputs": [1, 2] }));
        let result = unit.apply(&json!({ "outputs": [1, 2] }), &ExecContext::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_interrupted_apply_is_refused() {
        let unit = printer(json!({}));
        let ctx = ExecContext::default();
        ctx.interrupt();
        assert!(unit.apply(&json!({}), &ctx).await.is_err());
    }
}

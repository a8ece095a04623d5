//! Deliver phase: write the battle-card artifacts to disk.

use std::path::PathBuf;

use async_trait::async_trait;
use battlecard_engine::{PhaseNode, PhaseOutcome, StatePatch};
use battlecard_render::{raw_data_json, render_markdown, slugify};
use battlecard_shared::{ErrorKind, RunState};
use tracing::{info, instrument};

/// Renders the Markdown card plus its raw-data JSON companion and writes
/// both under the output directory. Filenames follow the company slug:
/// `<slug>_battle_card.md` and `<slug>_data.json`.
pub struct DeliverNode {
    output_dir: PathBuf,
}

impl DeliverNode {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl PhaseNode for DeliverNode {
    #[instrument(skip_all, fields(company = %state.company_name))]
    async fn run(&self, state: &RunState) -> PhaseOutcome {
        let abort = |message: String| PhaseOutcome::Abort {
            kind: ErrorKind::UnrecoverableInput,
            message,
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            return abort(format!(
                "cannot create output dir {}: {e}",
                self.output_dir.display()
            ));
        }

        let slug = slugify(&state.company_name);
        let card_path = self.output_dir.join(format!("{slug}_battle_card.md"));
        let data_path = self.output_dir.join(format!("{slug}_data.json"));

        let markdown = render_markdown(state);
        let raw = match raw_data_json(state) {
            Ok(raw) => raw,
            Err(e) => return abort(format!("cannot serialize raw data: {e}")),
        };

        if let Err(e) = tokio::fs::write(&card_path, markdown).await {
            return abort(format!("cannot write {}: {e}", card_path.display()));
        }
        if let Err(e) = tokio::fs::write(&data_path, raw).await {
            return abort(format!("cannot write {}: {e}", data_path.display()));
        }

        info!(path = %card_path.display(), "battle card delivered");
        PhaseOutcome::Success(StatePatch::Deliver {
            artifact_path: card_path.display().to_string(),
        })
    }
}

//! Session descriptors: the active unit of work inside a workspace.
//!
//! One active session per state document. A session is never deleted: ending
//! it flips the active flag, and the next start archives it into
//! `runtime.sessionHistory`.

use crate::core::error::AipmError;
use crate::core::store::StateStore;
use crate::core::time;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionContext {
    /// Primary workspace of the framework itself.
    Framework,
    /// A named project workspace.
    Project,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub id: String,
    pub context: SessionContext,
    #[serde(default)]
    pub project: Option<String>,
    pub started_at: String,
    #[serde(default)]
    pub ended_at: Option<String>,
    pub active: bool,
}

impl SessionDescriptor {
    fn new(context: SessionContext, project: Option<String>) -> Self {
        SessionDescriptor {
            id: Ulid::new().to_string(),
            context,
            project,
            started_at: time::now_rfc3339(),
            ended_at: None,
            active: true,
        }
    }
}

/// Begin a session. Fails when one is already active; an earlier inactive
/// session is superseded into history.
pub fn start_session(
    store: &StateStore,
    context: SessionContext,
    project: Option<String>,
) -> Result<SessionDescriptor, AipmError> {
    if context == SessionContext::Project && project.as_deref().unwrap_or("").is_empty() {
        return Err(AipmError::ValidationError(vec![
            "runtime.session: project context requires a project name".into(),
        ]));
    }

    store.ensure_initialized()?;
    let mut tx = store.begin("session.start")?;
    let mut runtime = tx.doc().runtime()?;

    if let Some(existing) = &runtime.session {
        if existing.active {
            return Err(AipmError::ValidationError(vec![format!(
                "runtime.session: session {} is already active; run `aipm stop` first",
                existing.id
            )]));
        }
        runtime.session_history.push(existing.clone());
    }

    let session = SessionDescriptor::new(context, project);
    runtime.session = Some(session.clone());
    tx.doc().set_section("runtime", &runtime)?;
    tx.commit()?;
    Ok(session)
}

/// End the active session: sets the inactive flag and the end time. The
/// descriptor stays in place until the next start supersedes it.
pub fn end_session(store: &StateStore) -> Result<SessionDescriptor, AipmError> {
    store.ensure_initialized()?;
    let mut tx = store.begin("session.end")?;
    let mut runtime = tx.doc().runtime()?;

    let Some(mut session) = runtime.session.take() else {
        return Err(AipmError::NotFound("runtime.session: no session".into()));
    };
    if !session.active {
        return Err(AipmError::ValidationError(vec![format!(
            "runtime.session: session {} already ended",
            session.id
        )]));
    }

    session.active = false;
    session.ended_at = Some(time::now_rfc3339());
    runtime.session = Some(session.clone());
    tx.doc().set_section("runtime", &runtime)?;
    tx.commit()?;
    Ok(session)
}

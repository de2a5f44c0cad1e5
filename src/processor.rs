// Token authenticator processor
// Per-message orchestration: detect configuration changes, extract the bearer
// token, run validation and authorization, emit attributes and route the
// message to exactly one of the two outcome lanes. Also owns the scheduling
// lifecycle and the background JWKS refresh task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use tokio::task::JoinHandle;

use crate::authorization;
use crate::config::properties::PROP_OVERLAY_CONFIG_FILE;
use crate::config::{
    merge_properties, ConfigError, GlobalSettings, OverlaySource, TokenLocation,
};
use crate::error::{self, ErrorCategory, Result};
use crate::flow::{
    FlowFile, ProcessContext, ProcessSession, Processor, REL_AUTHENTICATION_FAILED, REL_SUCCESS,
};
use crate::keys::{JwksCache, JwksCacheConfig};
use crate::registry::{install_initial_snapshot, IssuerRegistry, RegistrySnapshot};
use crate::validation::{TokenValidator, ValidationError};

// Attribute keys written by the processor.
pub const ATTR_CONTENT_PREFIX: &str = "jwt.content.";
pub const ATTR_TOKEN_SUBJECT: &str = "jwt.token.subject";
pub const ATTR_TOKEN_ISSUER: &str = "jwt.token.issuer";
pub const ATTR_TOKEN_EXPIRATION: &str = "jwt.token.expiration";
pub const ATTR_TOKEN_SCOPES: &str = "jwt.token.scopes";
pub const ATTR_TOKEN_ROLES: &str = "jwt.token.roles";
pub const ATTR_TOKEN_GROUPS: &str = "jwt.token.groups";
pub const ATTR_TOKEN_PRESENT: &str = "jwt.token.present";
pub const ATTR_VALIDATED_AT: &str = "jwt.token.validated.at";
pub const ATTR_AUTHORIZED: &str = "jwt.authorization.authorized";
pub const ATTR_BYPASSED: &str = "jwt.authorization.bypassed";
pub const ATTR_AUTHZ_REASON: &str = "jwt.authorization.reason";
pub const ATTR_ERROR_CODE: &str = "jwt.error.code";
pub const ATTR_ERROR_REASON: &str = "jwt.error.reason";
pub const ATTR_ERROR_CATEGORY: &str = "jwt.error.category";

/// Runtime state built at scheduling time and swapped atomically on
/// reconfiguration. Never transits through a torn intermediate.
struct Engine {
    settings: GlobalSettings,
    cache: Arc<JwksCache>,
    overlay: Option<Arc<OverlaySource>>,
}

/// Multi-issuer JWT bearer-token validator.
///
/// One instance serves any number of concurrent `on_trigger` calls. Shared
/// state is limited to the registry snapshot pointer, the JWKS cache map and
/// the engine pointer; readers never block.
pub struct TokenAuthenticator {
    registry: Arc<IssuerRegistry>,
    engine: ArcSwapOption<Engine>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    validated_at: AtomicI64,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(IssuerRegistry::new()),
            engine: ArcSwapOption::const_empty(),
            refresh_task: Mutex::new(None),
            validated_at: AtomicI64::new(0),
        }
    }

    /// Strictly increasing validation timestamp in milliseconds.
    fn next_validated_at(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .validated_at
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(if now > prev { now } else { prev + 1 })
            })
            .unwrap_or_else(|p| p);
        if now > prev {
            now
        } else {
            prev + 1
        }
    }

    /// Host properties with the overlay file (if any) merged on top.
    fn effective_properties(
        context: &ProcessContext,
        overlay: Option<&OverlaySource>,
    ) -> std::result::Result<HashMap<String, String>, ConfigError> {
        match overlay {
            Some(overlay) => Ok(merge_properties(context.properties(), overlay.snapshot()?)),
            None => Ok(context.properties().clone()),
        }
    }

    fn spawn_refresh_task(&self, cache: Arc<JwksCache>, settings: &GlobalSettings) {
        let interval = settings.refresh_interval.max(std::time::Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::debug!("running scheduled JWKS refresh");
                cache.refresh_due().await;
            }
        });
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn stop_refresh_task(&self) {
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Compare the configuration fingerprint and rebuild the registry if it
    /// moved. Rebuild failures keep the previous snapshot serving.
    async fn refresh_configuration(&self, context: &ProcessContext, engine: &Arc<Engine>) {
        let props = match Self::effective_properties(context, engine.overlay.as_deref()) {
            Ok(props) => props,
            Err(e) => {
                tracing::error!(error = %e, "overlay reload failed, keeping current configuration");
                return;
            }
        };

        let fingerprint = crate::config::configuration_fingerprint(&props);
        if self.registry.fingerprint_matches(&fingerprint) {
            return;
        }

        let settings = match GlobalSettings::parse(&props) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "invalid reconfiguration, keeping current snapshot");
                return;
            }
        };

        match self
            .registry
            .rebuild_if_changed(&props, &settings, &engine.cache)
            .await
        {
            Ok(true) => {
                self.engine.store(Some(Arc::new(Engine {
                    settings,
                    cache: Arc::clone(&engine.cache),
                    overlay: engine.overlay.clone(),
                })));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "registry rebuild failed, keeping current snapshot");
            }
        }
    }

    /// Locate the bearer token on the flow file.
    fn extract_token(
        settings: &GlobalSettings,
        flow_file: &FlowFile,
    ) -> std::result::Result<Option<String>, ValidationError> {
        let raw = match settings.token_location {
            TokenLocation::AuthorizationHeader | TokenLocation::CustomHeader => {
                let Some(header) = settings.effective_header() else {
                    return Ok(None);
                };
                // Header attributes arrive canonicalized under the
                // http.headers. prefix; fall back to the bare header name.
                let canonical = format!("http.headers.{}", header.to_ascii_lowercase());
                flow_file
                    .attribute_ignore_case(&canonical)
                    .or_else(|| flow_file.attribute_ignore_case(header))
                    .map(|v| v.to_string())
            }
            TokenLocation::MessageBody => {
                if flow_file.payload().is_empty() {
                    None
                } else {
                    let text = std::str::from_utf8(flow_file.payload()).map_err(|_| {
                        ValidationError::Malformed("message body is not valid UTF-8".to_string())
                    })?;
                    Some(text.to_string())
                }
            }
        };

        let Some(raw) = raw else {
            return Ok(None);
        };
        let value = raw.trim();
        let token = value
            .strip_prefix(settings.bearer_prefix.as_str())
            .unwrap_or(value)
            .trim();
        Ok(Some(token.to_string()).filter(|t| !t.is_empty()))
    }

    fn route_success(
        &self,
        session: &mut ProcessSession,
        mut flow_file: FlowFile,
        attributes: Vec<(String, String)>,
    ) {
        flow_file.put_all(attributes);
        session.transfer(flow_file, REL_SUCCESS);
    }

    fn route_failure(
        &self,
        session: &mut ProcessSession,
        mut flow_file: FlowFile,
        code: &str,
        category: ErrorCategory,
        reason: String,
        token_present: bool,
    ) {
        tracing::debug!(code, category = category.as_str(), reason = %reason, "routing to authentication-failed");
        flow_file.put_attribute(ATTR_TOKEN_PRESENT, token_present.to_string());
        flow_file.put_attribute(ATTR_ERROR_CODE, code);
        flow_file.put_attribute(ATTR_ERROR_REASON, reason);
        flow_file.put_attribute(ATTR_ERROR_CATEGORY, category.as_str());
        session.transfer(flow_file, REL_AUTHENTICATION_FAILED);
    }

    fn route_validation_failure(
        &self,
        session: &mut ProcessSession,
        flow_file: FlowFile,
        error: &ValidationError,
    ) {
        let reason = match error {
            // Internal failures carry a correlation id so operators can find
            // the matching log line.
            ValidationError::Internal(detail) => {
                let correlation = uuid::Uuid::new_v4();
                tracing::error!(%correlation, detail = %detail, "unexpected processing error");
                format!("unexpected processing error ({correlation})")
            }
            other => other.to_string(),
        };
        let token_present = !matches!(error, ValidationError::MissingToken);
        self.route_failure(
            session,
            flow_file,
            error.code(),
            error.category(),
            reason,
            token_present,
        );
    }

    fn success_attributes(
        &self,
        validated: &crate::validation::ValidatedToken,
        outcome: &authorization::AuthorizationOutcome,
    ) -> Vec<(String, String)> {
        let mut attrs = Vec::new();

        // Every claim is exposed under the content prefix; non-string values
        // are JSON-encoded.
        for (name, value) in validated.claims.iter() {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            attrs.push((format!("{ATTR_CONTENT_PREFIX}{name}"), rendered));
        }

        if let Some(subject) = validated.claims.subject() {
            attrs.push((ATTR_TOKEN_SUBJECT.to_string(), subject.to_string()));
        }
        attrs.push((ATTR_TOKEN_ISSUER.to_string(), validated.issuer_id.clone()));
        if let Some(exp) = validated.claims.expiration() {
            attrs.push((ATTR_TOKEN_EXPIRATION.to_string(), exp.to_string()));
        }
        attrs.push((
            ATTR_TOKEN_SCOPES.to_string(),
            validated.claims.scopes().join(","),
        ));
        attrs.push((
            ATTR_TOKEN_ROLES.to_string(),
            validated.claims.roles().join(","),
        ));
        attrs.push((
            ATTR_TOKEN_GROUPS.to_string(),
            validated.claims.groups().join(","),
        ));
        attrs.push((ATTR_TOKEN_PRESENT.to_string(), "true".to_string()));
        attrs.push((
            ATTR_VALIDATED_AT.to_string(),
            self.next_validated_at().to_string(),
        ));
        attrs.push((
            ATTR_AUTHORIZED.to_string(),
            outcome.authorized.to_string(),
        ));
        attrs.push((ATTR_BYPASSED.to_string(), outcome.bypassed.to_string()));
        attrs
    }
}

impl Default for TokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokenAuthenticator {
    fn drop(&mut self) {
        self.stop_refresh_task();
    }
}

impl Processor for TokenAuthenticator {
    fn initialize(&self) {
        tracing::debug!(
            properties = crate::config::properties::PROPERTY_DESCRIPTORS.len(),
            attributes = crate::config::properties::ATTRIBUTE_DESCRIPTORS.len(),
            relationships = crate::flow::RELATIONSHIPS.len(),
            "token authenticator registered"
        );
    }

    async fn on_scheduled(&self, context: &ProcessContext) -> Result<()> {
        let overlay = context
            .property(PROP_OVERLAY_CONFIG_FILE)
            .map(|path| Arc::new(OverlaySource::new(path)));

        let props = Self::effective_properties(context, overlay.as_deref())?;
        let settings = GlobalSettings::parse(&props)?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;
        let cache = Arc::new(JwksCache::new(client, JwksCacheConfig::default()));

        install_initial_snapshot(&self.registry, &props, &settings, &cache)?;
        self.spawn_refresh_task(Arc::clone(&cache), &settings);

        tracing::info!(
            issuers = self.registry.current().len(),
            require_valid_token = settings.require_valid_token,
            "token authenticator scheduled"
        );

        self.engine.store(Some(Arc::new(Engine {
            settings,
            cache,
            overlay,
        })));
        Ok(())
    }

    fn on_stopped(&self) {
        self.stop_refresh_task();
        if let Some(engine) = self.engine.swap(None) {
            engine.cache.clear();
        }
        self.registry.reset();
        tracing::info!("token authenticator stopped");
    }

    async fn on_trigger(
        &self,
        context: &ProcessContext,
        session: &mut ProcessSession,
    ) -> Result<()> {
        let Some(flow_file) = session.take() else {
            return Ok(());
        };

        let Some(engine) = self.engine.load_full() else {
            self.route_failure(
                session,
                flow_file,
                error::CODE_INTERNAL,
                ErrorCategory::Internal,
                "validator not initialized".to_string(),
                false,
            );
            return Ok(());
        };

        // Reconfiguration check runs before the snapshot is observed so the
        // message sees either the old or the new registry, never a mix.
        self.refresh_configuration(context, &engine).await;
        let engine = self.engine.load_full().unwrap_or(engine);
        let snapshot: Arc<RegistrySnapshot> = self.registry.current();

        let token = match Self::extract_token(&engine.settings, &flow_file) {
            Ok(token) => token,
            Err(e) => {
                self.route_validation_failure(session, flow_file, &e);
                return Ok(());
            }
        };

        let Some(token) = token else {
            if engine.settings.require_valid_token {
                self.route_validation_failure(session, flow_file, &ValidationError::MissingToken);
            } else {
                // Pass-through mode: no token is an accepted outcome, marked
                // explicitly as unauthenticated.
                self.route_success(
                    session,
                    flow_file,
                    vec![
                        (ATTR_TOKEN_PRESENT.to_string(), "false".to_string()),
                        (ATTR_AUTHORIZED.to_string(), "false".to_string()),
                    ],
                );
            }
            return Ok(());
        };

        let validator = TokenValidator::new(&snapshot, &engine.cache, &engine.settings);
        let validated = match validator.validate(&token).await {
            Ok(validated) => validated,
            Err(e) => {
                self.route_validation_failure(session, flow_file, &e);
                return Ok(());
            }
        };

        let policy = snapshot
            .issuer(&validated.issuer_id)
            .and_then(|entry| entry.authorization.as_ref());
        let outcome = authorization::evaluate(policy, &validated.claims);

        if !outcome.authorized {
            let reason = outcome
                .reason
                .unwrap_or_else(|| "authorization denied".to_string());
            let mut flow_file = flow_file;
            flow_file.put_attribute(ATTR_AUTHORIZED, "false");
            flow_file.put_attribute(ATTR_AUTHZ_REASON, reason.clone());
            self.route_failure(
                session,
                flow_file,
                error::CODE_AUTHORIZATION,
                ErrorCategory::Authorization,
                reason,
                true,
            );
            return Ok(());
        }

        tracing::debug!(
            issuer = %validated.issuer_id,
            subject = validated.claims.subject().unwrap_or(""),
            bypassed = outcome.bypassed,
            "token validated"
        );
        let attrs = self.success_attributes(&validated, &outcome);
        self.route_success(session, flow_file, attrs);
        Ok(())
    }
}

//! HTTP surface: masquerade views, sign in/out, credential flows, and
//! the lockout page.
//!
//! Handlers are thin: they load the session from its cookie, call the
//! service layer, queue flash messages, save the session back, and
//! redirect. Rendering pages is the host application's concern.

use crate::accounts::{Directory, PermissionChecker, User};
use crate::admin::AdminActions;
use crate::audit::{AuditLogger, AuditStore, AuditSubscriber};
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::flows::{AccountFlows, LoginOutcome, LogoutOutcome};
use crate::language::RequestLanguage;
use crate::lockout::{CaptchaVerifier, LockoutStore, LockoutTracker};
use crate::mailer::Mailer;
use crate::masquerade::{BeginOutcome, EndOutcome, MasqueradeManager};
use crate::password::PasswordHasher;
use crate::session::{AuthSession, SessionStore};
use crate::timezone::RequestTimezone;
use axum::{
    Form, Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::get,
};
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "quarterdeck_session";

/// Shared state for the account routes.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub directory: Arc<dyn Directory>,
    pub sessions: Arc<dyn SessionStore>,
    pub masquerade: Arc<MasqueradeManager>,
    pub flows: Arc<AccountFlows>,
    pub admin: Arc<AdminActions>,
    pub lockout: Arc<LockoutTracker>,
    pub captcha: Arc<dyn CaptchaVerifier>,
}

impl AppContext {
    /// Wire the full extension from its pluggable parts.
    ///
    /// This is the composition root: it builds the event bus with the
    /// audit subscriber attached, then the masquerade manager, flows,
    /// and admin actions on top of it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        directory: Arc<dyn Directory>,
        sessions: Arc<dyn SessionStore>,
        audit_store: Arc<dyn AuditStore>,
        permissions: Arc<dyn PermissionChecker>,
        lockout_store: Arc<dyn LockoutStore>,
        mailer: Arc<dyn Mailer>,
        captcha: Arc<dyn CaptchaVerifier>,
        hasher: PasswordHasher,
    ) -> Self {
        let logger = AuditLogger::new(config.audit.clone(), directory.clone(), audit_store);
        let events = Arc::new(EventBus::new().subscribe(Arc::new(AuditSubscriber::new(logger))));

        let lockout = Arc::new(LockoutTracker::new(lockout_store, config.lockout.clone()));
        let masquerade = Arc::new(MasqueradeManager::new(
            directory.clone(),
            permissions,
            events.clone(),
            config.masquerade.clone(),
        ));
        let flows = Arc::new(AccountFlows::new(
            directory.clone(),
            events.clone(),
            lockout.clone(),
            mailer,
            hasher.clone(),
            config.flows.clone(),
        ));
        let admin = Arc::new(AdminActions::new(
            directory.clone(),
            events,
            flows.clone(),
            hasher,
        ));

        Self {
            config: Arc::new(config),
            directory,
            sessions,
            masquerade,
            flows,
            admin,
            lockout,
            captcha,
        }
    }
}

/// Trait for composable route modules.
///
/// Implement this to create modular route groups that the host
/// application can merge into its router.
pub trait RouteModule {
    /// The module's routes, without state applied.
    fn routes(&self) -> Router<AppContext>
    where
        Self: Sized;

    /// Optional path prefix for all routes in this module.
    fn prefix(&self) -> Option<&str> {
        None
    }

    /// Register this module's routes into a router.
    fn register(self, router: Router<AppContext>) -> Router<AppContext>
    where
        Self: Sized,
    {
        let routes = self.routes();
        if let Some(prefix) = self.prefix() {
            router.nest(prefix, routes)
        } else {
            router.merge(routes)
        }
    }
}

/// The account extension's routes.
pub struct AccountsModule;

impl RouteModule for AccountsModule {
    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route("/login/", get(login_form).post(login))
            .route("/logout/", get(logout).post(logout))
            .route("/password_change/", get(password_change_form).post(password_change))
            .route("/password_reset/", get(password_reset_form).post(password_reset))
            .route("/locked/", get(locked_out_form).post(locked_out))
            .route("/admin/masquerade/end/", get(end_masquerade))
            .route("/admin/masquerade/{user_id}/", get(masquerade))
            .route("/admin/users/reset_passwords/", axum::routing::post(reset_passwords))
    }
}

/// Build a router with the account routes and preference middleware.
pub fn router(ctx: AppContext) -> Router {
    AccountsModule
        .register(Router::new())
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            request_preferences,
        ))
        .with_state(ctx)
}

// --- session plumbing ---

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    Cookie::split_parse(raw.to_string())
        .filter_map(std::result::Result::ok)
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

async fn load_session(ctx: &AppContext, headers: &HeaderMap) -> Result<(String, AuthSession)> {
    if let Some(session_id) = session_id_from(headers) {
        if let Some(session) = ctx.sessions.load(&session_id).await? {
            return Ok((session_id, session));
        }
    }
    Ok((Uuid::new_v4().to_string(), AuthSession::new()))
}

/// Save the session and answer with a redirect carrying the cookie.
async fn commit(
    ctx: &AppContext,
    session_id: &str,
    session: &AuthSession,
    redirect: &str,
) -> Result<Response> {
    ctx.sessions.save(session_id, session).await?;

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie.to_string())]),
        Redirect::to(redirect),
    )
        .into_response())
}

async fn current_user(ctx: &AppContext, session: &AuthSession) -> Result<Option<User>> {
    match session.user_id() {
        Some(id) => ctx.directory.find_by_id(id).await,
        None => Ok(None),
    }
}

// --- per-request preferences ---

/// Resolve the request's display timezone and language and thread them
/// through as extensions. The values live only as long as the request.
pub async fn request_preferences(
    State(ctx): State<AppContext>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match load_session(&ctx, request.headers()).await {
        Ok((_, session)) => current_user(&ctx, &session).await.unwrap_or(None),
        Err(_) => None,
    };

    let explicit_lang = request
        .uri()
        .query()
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("lang=")))
        .map(str::to_string);

    let timezone = RequestTimezone::resolve(user.as_ref(), &ctx.config.timezone);
    let language = RequestLanguage::resolve(
        explicit_lang.as_deref(),
        user.as_ref(),
        &ctx.config.language,
    );

    request.extensions_mut().insert(timezone);
    request.extensions_mut().insert(language);
    next.run(request).await
}

// --- masquerade views ---

async fn masquerade(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok());

    let outcome = ctx
        .masquerade
        .begin_masquerade(&mut session, Some(&user_id), referer)
        .await?;

    let redirect = match outcome {
        BeginOutcome::Started { redirect, .. } | BeginOutcome::Denied { redirect, .. } => redirect,
    };
    commit(&ctx, &session_id, &session, &redirect).await
}

async fn end_masquerade(State(ctx): State<AppContext>, headers: HeaderMap) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;

    let outcome = ctx.masquerade.end_masquerade(&mut session).await?;
    let redirect = match outcome {
        EndOutcome::Ended { redirect }
        | EndOutcome::NotMasquerading { redirect }
        | EndOutcome::Degraded { redirect } => redirect,
    };
    commit(&ctx, &session_id, &session, &redirect).await
}

// --- sign in / sign out ---

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

async fn login_form() -> StatusCode {
    StatusCode::OK
}

async fn login(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;

    let outcome = ctx
        .flows
        .login(&mut session, &form.email, &form.password)
        .await?;

    let redirect = match outcome {
        LoginOutcome::LoggedIn { redirect, .. } => redirect,
        LoginOutcome::LockedOut { redirect } => redirect,
        LoginOutcome::InvalidCredentials => {
            session.flash_error("Invalid email or password");
            ctx.config.flows.login_url.clone()
        }
    };
    commit(&ctx, &session_id, &session, &redirect).await
}

/// Sign out — or, when the session is masquerading, end the masquerade
/// instead of destroying the impersonator's own session.
async fn logout(State(ctx): State<AppContext>, headers: HeaderMap) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;

    let outcome = ctx.flows.logout(&mut session).await?;
    let redirect = match outcome {
        LogoutOutcome::EndMasquerade { redirect } | LogoutOutcome::LoggedOut { redirect } => {
            redirect
        }
    };
    commit(&ctx, &session_id, &session, &redirect).await
}

// --- credential flows ---

#[derive(Debug, Serialize)]
struct PasswordChangeInfo {
    requirement: &'static str,
}

async fn password_change_form(State(ctx): State<AppContext>) -> Json<PasswordChangeInfo> {
    Json(PasswordChangeInfo {
        requirement: ctx.flows.policy().requirement(),
    })
}

#[derive(Debug, Deserialize)]
struct PasswordChangeForm {
    current_password: String,
    new_password: String,
}

async fn password_change(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(form): Form<PasswordChangeForm>,
) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;

    ctx.flows
        .change_password(&session, &form.current_password, &form.new_password)
        .await?;

    session.flash_success("Password changed");
    commit(&ctx, &session_id, &session, "/password_change/done/").await
}

async fn password_reset_form() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct PasswordResetForm {
    email: String,
}

async fn password_reset(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(form): Form<PasswordResetForm>,
) -> Result<Response> {
    let (session_id, session) = load_session(&ctx, &headers).await?;

    ctx.flows
        .request_password_reset(&session, &form.email)
        .await?;

    commit(&ctx, &session_id, &session, "/password_reset/done/").await
}

// --- lockout page ---

#[derive(Debug, Serialize)]
struct LockedOutInfo {
    template: String,
}

async fn locked_out_form(State(ctx): State<AppContext>) -> Json<LockedOutInfo> {
    Json(LockedOutInfo {
        template: ctx.config.lockout.lockout_template.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct LockedOutForm {
    username: String,
    captcha: String,
}

/// Captcha-verified unlock, then back to the sign-in page.
async fn locked_out(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(form): Form<LockedOutForm>,
) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;

    let unlocked = ctx
        .lockout
        .unlock(ctx.captcha.as_ref(), &form.username, &form.captcha)
        .await?;

    let redirect = if unlocked {
        ctx.config.flows.login_url.clone()
    } else {
        session.flash_error("Captcha verification failed");
        ctx.config.lockout.lockout_url.clone()
    };
    commit(&ctx, &session_id, &session, &redirect).await
}

// --- admin bulk action ---

#[derive(Debug, Deserialize)]
struct ResetPasswordsRequest {
    user_ids: Vec<String>,
}

/// Bulk action: send password-reset emails to the selected users.
async fn reset_passwords(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(request): Json<ResetPasswordsRequest>,
) -> Result<Response> {
    let (session_id, mut session) = load_session(&ctx, &headers).await?;
    let actor = current_user(&ctx, &session)
        .await?
        .ok_or_else(|| crate::error::QuarterdeckError::unauthorized("Sign in required"))?;

    let sent = ctx
        .admin
        .reset_passwords(&session, &actor, &request.user_ids)
        .await?;

    session.flash_success(format!("Password reset email sent to {sent} users"));
    let redirect = ctx.config.masquerade.default_return_url.clone();
    commit(&ctx, &session_id, &session, &redirect).await
}

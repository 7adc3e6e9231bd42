//! Content-Security-Policy and hardening response headers.
//!
//! # Responsibilities
//! - Build CSP directives allowing the app to be framed only by approved hosts
//! - Render a deterministic CSP header string
//! - Add static hardening headers to every response
//!
//! # Design Decisions
//! - `X-Frame-Options` is never emitted. `frame-ancestors` is what lets the
//!   embedding host frame the app, and the legacy header overrides it in
//!   some browsers.
//! - Directives render in a fixed order so header bytes are stable.
//! - Overrides replace a directive wholesale; they never append.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::{EmbeddingConfig, GatewayConfig};

const SELF: &str = "'self'";
const NONE: &str = "'none'";

pub const PERMISSIONS_POLICY: &str =
    "camera=(), microphone=(), geolocation=(), payment=(), usb=(), magnetometer=(), gyroscope=()";
pub const HSTS: &str = "max-age=31536000; includeSubDomains";

/// CSP directives this gateway manages. Declaration order is render order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CspDirective {
    FrameAncestors,
    ScriptSrc,
    StyleSrc,
    ConnectSrc,
    ImgSrc,
    DefaultSrc,
    FormAction,
    BaseUri,
    ObjectSrc,
}

impl CspDirective {
    pub const ALL: [CspDirective; 9] = [
        CspDirective::FrameAncestors,
        CspDirective::ScriptSrc,
        CspDirective::StyleSrc,
        CspDirective::ConnectSrc,
        CspDirective::ImgSrc,
        CspDirective::DefaultSrc,
        CspDirective::FormAction,
        CspDirective::BaseUri,
        CspDirective::ObjectSrc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CspDirective::FrameAncestors => "frame-ancestors",
            CspDirective::ScriptSrc => "script-src",
            CspDirective::StyleSrc => "style-src",
            CspDirective::ConnectSrc => "connect-src",
            CspDirective::ImgSrc => "img-src",
            CspDirective::DefaultSrc => "default-src",
            CspDirective::FormAction => "form-action",
            CspDirective::BaseUri => "base-uri",
            CspDirective::ObjectSrc => "object-src",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

/// Directive → ordered source tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CspDirectives {
    directives: BTreeMap<CspDirective, Vec<String>>,
}

/// Replacement source lists keyed by directive.
pub type CspOverrides = BTreeMap<CspDirective, Vec<String>>;

impl CspDirectives {
    pub fn set<I, S>(&mut self, directive: CspDirective, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives
            .insert(directive, sources.into_iter().map(Into::into).collect());
    }

    pub fn get(&self, directive: CspDirective) -> Option<&[String]> {
        self.directives.get(&directive).map(Vec::as_slice)
    }

    /// Apply overrides. Each replaces its directive. `frame-ancestors`
    /// keeps `'self'` first even if the override omits it.
    pub fn merge(mut self, overrides: &CspOverrides) -> Self {
        for (directive, sources) in overrides {
            let mut sources = sources.clone();
            if *directive == CspDirective::FrameAncestors && !sources.iter().any(|s| s == SELF) {
                sources.insert(0, SELF.to_string());
            }
            self.directives.insert(*directive, sources);
        }
        self
    }
}

/// Default directives for an app embedded by Discord.
pub fn build_default_csp_directives(
    client_id: &str,
    additional_frame_ancestors: &[String],
) -> CspDirectives {
    let proxy_host = (!client_id.is_empty()).then(|| format!("https://{client_id}.discordsays.com"));

    let mut frame_ancestors = vec![
        SELF.to_string(),
        "https://discord.com".to_string(),
        "https://*.discord.com".to_string(),
        "https://*.discordsays.com".to_string(),
    ];
    if let Some(host) = &proxy_host {
        frame_ancestors.push(host.clone());
    }
    for extra in additional_frame_ancestors {
        if !frame_ancestors.contains(extra) {
            frame_ancestors.push(extra.clone());
        }
    }

    let mut directives = CspDirectives::default();
    directives.set(CspDirective::FrameAncestors, frame_ancestors);
    directives.set(CspDirective::ScriptSrc, [SELF]);
    directives.set(CspDirective::StyleSrc, [SELF, "'unsafe-inline'"]);
    directives.set(
        CspDirective::ConnectSrc,
        [
            SELF,
            "https://discord.com",
            "https://*.discordsays.com",
            "wss://*.discordsays.com",
        ],
    );
    directives.set(
        CspDirective::ImgSrc,
        [
            SELF,
            "data:",
            "https://cdn.discordapp.com",
            "https://media.discordapp.net",
        ],
    );
    directives.set(CspDirective::DefaultSrc, [SELF]);
    directives.set(CspDirective::FormAction, [SELF]);
    directives.set(CspDirective::BaseUri, [SELF]);
    directives.set(CspDirective::ObjectSrc, [NONE]);
    directives
}

/// Render directives as a header value. Empty directives are skipped.
pub fn build_csp_header(directives: &CspDirectives) -> String {
    CspDirective::ALL
        .iter()
        .filter_map(|d| {
            directives
                .get(*d)
                .filter(|sources| !sources.is_empty())
                .map(|sources| format!("{} {}", d.name(), sources.join(" ")))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Precomputed security headers.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn new(directives: &CspDirectives, production: bool) -> Result<Self, header::InvalidHeaderValue> {
        let mut headers = vec![
            (
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_str(&build_csp_header(directives))?,
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (
                header::X_XSS_PROTECTION,
                HeaderValue::from_static("1; mode=block"),
            ),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
            (
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_static(PERMISSIONS_POLICY),
            ),
        ];
        if production {
            headers.push((
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static(HSTS),
            ));
        }
        Ok(Self { headers })
    }

    /// Build from the gateway config. Unknown override names were rejected
    /// by validation and are skipped here.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, header::InvalidHeaderValue> {
        let EmbeddingConfig {
            client_id,
            additional_frame_ancestors,
            production,
        } = &config.embedding;

        let overrides: CspOverrides = config
            .csp
            .overrides
            .iter()
            .filter_map(|(name, sources)| {
                CspDirective::from_name(name).map(|d| (d, sources.clone()))
            })
            .collect();

        let directives =
            build_default_csp_directives(client_id, additional_frame_ancestors).merge(&overrides);
        Self::new(&directives, *production)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, HeaderValue)> {
        self.headers.iter()
    }
}

/// Response header middleware.
pub async fn security_headers_middleware(
    State(security): State<Arc<SecurityHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in security.iter() {
        headers.insert(name.clone(), value.clone());
    }
    headers.remove(header::X_FRAME_OPTIONS);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    #[test]
    fn header_renders_in_fixed_order() {
        let mut directives = CspDirectives::default();
        directives.set(CspDirective::ObjectSrc, ["'none'"]);
        directives.set(CspDirective::ScriptSrc, ["'self'", "https://cdn.example"]);
        directives.set(CspDirective::FrameAncestors, ["'self'"]);
        directives.set(CspDirective::ImgSrc, Vec::<String>::new());

        let header = build_csp_header(&directives);
        assert_eq!(
            header,
            "frame-ancestors 'self'; script-src 'self' https://cdn.example; object-src 'none'"
        );
        assert_eq!(header, build_csp_header(&directives.clone()));
        assert!(!header.ends_with(';'));
    }

    #[test]
    fn defaults_include_embedding_hosts() {
        let directives =
            build_default_csp_directives("1234", &["https://partner.example".to_string()]);
        let ancestors = directives.get(CspDirective::FrameAncestors).unwrap();
        assert_eq!(ancestors[0], "'self'");
        assert!(ancestors.contains(&"https://1234.discordsays.com".to_string()));
        assert!(ancestors.contains(&"https://partner.example".to_string()));
        assert_eq!(directives.get(CspDirective::ObjectSrc).unwrap(), ["'none'"]);

        let header = build_csp_header(&directives);
        assert!(header.starts_with("frame-ancestors 'self' https://discord.com"));
        assert!(header.ends_with("object-src 'none'"));
    }

    #[test]
    fn overrides_replace_not_append() {
        let overrides = CspOverrides::from([
            (CspDirective::ScriptSrc, vec!["https://cdn.example".to_string()]),
            (
                CspDirective::FrameAncestors,
                vec!["https://only.example".to_string()],
            ),
        ]);
        let directives = build_default_csp_directives("", &[]).merge(&overrides);

        assert_eq!(
            directives.get(CspDirective::ScriptSrc).unwrap(),
            ["https://cdn.example"]
        );
        assert_eq!(
            directives.get(CspDirective::FrameAncestors).unwrap(),
            ["'self'", "https://only.example"]
        );
    }

    #[test]
    fn directive_names_round_trip() {
        for directive in CspDirective::ALL {
            assert_eq!(CspDirective::from_name(directive.name()), Some(directive));
        }
        assert_eq!(CspDirective::from_name("worker-src"), None);
    }

    async fn headers_for(production: bool) -> axum::http::HeaderMap {
        let security = Arc::new(
            SecurityHeaders::new(&build_default_csp_directives("1234", &[]), production).unwrap(),
        );
        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    (StatusCode::OK, [(header::X_FRAME_OPTIONS, "DENY")], "ok").into_response()
                }),
            )
            .layer(middleware::from_fn_with_state(
                security,
                security_headers_middleware,
            ));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.headers().clone()
    }

    #[tokio::test]
    async fn middleware_sets_hardening_headers() {
        let headers = headers_for(false).await;
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_XSS_PROTECTION], "1; mode=block");
        assert_eq!(
            headers[header::REFERRER_POLICY],
            "strict-origin-when-cross-origin"
        );
        assert_eq!(headers["permissions-policy"], PERMISSIONS_POLICY);
        assert!(headers[header::CONTENT_SECURITY_POLICY]
            .to_str()
            .unwrap()
            .contains("https://1234.discordsays.com"));
        assert!(headers.get(header::X_FRAME_OPTIONS).is_none());
        assert!(headers.get(header::STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[tokio::test]
    async fn hsts_only_in_production() {
        let headers = headers_for(true).await;
        assert_eq!(headers[header::STRICT_TRANSPORT_SECURITY], HSTS);
    }
}

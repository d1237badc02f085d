use std::fmt;
use std::path::Path;

use axum::Router;
use runtime::StaticServerSettings;
use tower_http::services::{ServeDir, ServeFile};

/// Where static assets come from.
#[derive(Clone, Copy, Default)]
pub enum StaticSource {
    /// `static_server.dir` on disk.
    #[default]
    Disk,
    /// Files compiled into the binary; `static_server.dir` is ignored.
    #[cfg(feature = "embed")]
    Embedded(embedded::EmbeddedAssets),
}

impl StaticSource {
    /// Serve the files of a `RustEmbed` folder.
    #[cfg(feature = "embed")]
    pub fn embedded<E: rust_embed::RustEmbed>() -> Self {
        StaticSource::Embedded(embedded::EmbeddedAssets::of::<E>())
    }
}

impl fmt::Debug for StaticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticSource::Disk => f.write_str("Disk"),
            #[cfg(feature = "embed")]
            StaticSource::Embedded(_) => f.write_str("Embedded"),
        }
    }
}

/// Serve static assets under `settings.path`. Unknown paths get the index
/// document so client-side routing keeps working.
///
/// Mounted at `/` the files become the router's fallback, so every route
/// registered by modules keeps precedence.
pub fn mount(router: Router, settings: &StaticServerSettings, source: StaticSource) -> Router {
    match source {
        StaticSource::Disk => mount_service(router, settings, disk_service(settings)),
        #[cfg(feature = "embed")]
        StaticSource::Embedded(assets) => {
            let index = settings.index_path.clone();
            let service = Router::new().fallback(move |uri: axum::http::Uri| {
                let index = index.clone();
                async move { assets.respond(uri.path(), &index) }
            });
            mount_service(router, settings, service)
        }
    }
}

fn disk_service(settings: &StaticServerSettings) -> ServeDir<ServeFile> {
    let dir = Path::new(&settings.dir);
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "static directory does not exist");
    }
    let index = dir.join(&settings.index_path);
    ServeDir::new(dir)
        .append_index_html_on_directories(true)
        .fallback(ServeFile::new(index))
}

fn mount_service<S>(router: Router, settings: &StaticServerSettings, service: S) -> Router
where
    S: tower::Service<axum::extract::Request, Error = std::convert::Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Response: axum::response::IntoResponse,
    S::Future: Send + 'static,
{
    let path = settings.path.trim().trim_end_matches('/');
    if path.is_empty() {
        router.fallback_service(service)
    } else {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        tracing::debug!(%path, "static files mounted");
        router.nest_service(&path, service)
    }
}

#[cfg(feature = "embed")]
mod embedded {
    use std::borrow::Cow;

    use axum::http::{header, StatusCode};
    use axum::response::{IntoResponse, Response};
    use rust_embed::{EmbeddedFile, RustEmbed};

    /// Type-erased lookup into a `RustEmbed` folder.
    #[derive(Clone, Copy)]
    pub struct EmbeddedAssets {
        get: fn(&str) -> Option<EmbeddedFile>,
    }

    impl EmbeddedAssets {
        pub fn of<E: RustEmbed>() -> Self {
            Self { get: E::get }
        }

        /// Directory requests get `index`; misses fall back to `index`.
        pub(super) fn respond(&self, path: &str, index: &str) -> Response {
            let path = path.trim_start_matches('/');
            let wanted: Cow<'_, str> = if path.is_empty() || path.ends_with('/') {
                Cow::Owned(format!("{path}{index}"))
            } else {
                Cow::Borrowed(path)
            };

            let found = (self.get)(&wanted)
                .map(|file| (content_type_for(&wanted), file))
                .or_else(|| (self.get)(index).map(|file| (content_type_for(index), file)));
            match found {
                Some((mime, file)) => ([(header::CONTENT_TYPE, mime)], file.data.into_owned()).into_response(),
                None => {
                    tracing::warn!(path = %wanted, "embedded asset not found");
                    StatusCode::NOT_FOUND.into_response()
                }
            }
        }
    }

    fn content_type_for(file: &str) -> &'static str {
        match file.rsplit('.').next().unwrap_or("") {
            "html" => "text/html; charset=utf-8",
            "css" => "text/css; charset=utf-8",
            "js" | "mjs" => "application/javascript; charset=utf-8",
            "json" | "map" => "application/json; charset=utf-8",
            "svg" => "image/svg+xml",
            "png" => "image/png",
            "ico" => "image/x-icon",
            "woff2" => "font/woff2",
            "ttf" => "font/ttf",
            "txt" => "text/plain; charset=utf-8",
            _ => "application/octet-stream",
        }
    }
}

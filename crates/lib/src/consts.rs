//! Default versions, download locations, and well-known file names.

use std::time::Duration;

pub const APP_NAME: &str = "ngxbuild";

pub const NGINX_VERSION: &str = "1.27.4";
pub const NGINX_DOWNLOAD_URL_PREFIX: &str = "https://nginx.org/download";

pub const PCRE_VERSION: &str = "10.45";
pub const PCRE_DOWNLOAD_URL_PREFIX: &str = "https://github.com/PCRE2Project/pcre2/releases/download";

pub const OPENSSL_VERSION: &str = "3.0.16";
pub const OPENSSL_DOWNLOAD_URL_PREFIX: &str = "https://github.com/openssl/openssl/releases/download";

pub const LIBRESSL_VERSION: &str = "4.0.0";
pub const LIBRESSL_DOWNLOAD_URL_PREFIX: &str = "https://ftp.openbsd.org/pub/OpenBSD/LibreSSL";

pub const ZLIB_VERSION: &str = "1.3.1";
pub const ZLIB_DOWNLOAD_URL_PREFIX: &str = "https://zlib.net";

pub const OPENRESTY_VERSION: &str = "1.27.1.2";
pub const OPENRESTY_DOWNLOAD_URL_PREFIX: &str = "https://openresty.org/download";

pub const FREENGINX_VERSION: &str = "1.27.4";
pub const FREENGINX_DOWNLOAD_URL_PREFIX: &str = "https://freenginx.org/download";

/// Upper bound for a single archive download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(900);

/// Binary probed for the installed version when `NGINX_BIN` is unset.
pub const DEFAULT_NGINX_BIN: &str = "/usr/local/sbin/nginx";
pub const NGINX_BIN_ENV: &str = "NGINX_BIN";

/// Name of the synthesized configure script inside the main source tree.
pub const CONFIGURE_SCRIPT: &str = "nginx-configure";
pub const CONFIGURE_LOG: &str = "nginx-configure.log";
pub const BUILD_LOG: &str = "nginx-build.log";

/// Flag that must accompany a statically linked crypto library.
pub const SSL_MODULE_FLAG: &str = "--with-http_ssl_module";

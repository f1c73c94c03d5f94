use std::fs;
use std::path::{Path, PathBuf};

use sterling_lib::config::{BackendKind, SessionType, XHTTP};
use sterling_lib::{load_from_path, Config, ConfigError, Features};

fn write_config(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).expect("write config");
    path
}

fn load(path: &Path) -> Result<Config, ConfigError> {
    load_from_path(path, &Features::default())
}

fn load_text(text: &str) -> Result<Config, ConfigError> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "test.cfg", text);
    load(&path)
}

#[test]
fn minimal_http_listener() {
    let cfg = load_text(
        "ListenHTTP\n\
         \tAddress 127.0.0.1\n\
         \tPort 8080\n\
         \tService\n\
         \t\tBackend\n\
         \t\t\tAddress 127.0.0.1\n\
         \t\t\tPort 9000\n\
         \t\tEnd\n\
         \tEnd\n\
         End\n",
    )
    .expect("parse");

    assert_eq!(cfg.listeners.len(), 1);
    let lst = &cfg.listeners[0];
    assert_eq!(lst.addr.socket_addr().expect("inet").to_string(), "127.0.0.1:8080");
    assert!(lst.addr.has_port);
    assert_eq!(lst.rewr_loc, 1);
    assert_eq!(lst.verb.pattern(), XHTTP[0]);
    assert!(lst.tls.is_none());

    assert_eq!(lst.services.len(), 1);
    let svc = &lst.services[0];
    assert_eq!(svc.backends.len(), 1);
    let be = &svc.backends[0];
    assert_eq!(be.kind, BackendKind::Backend);
    assert_eq!(be.addr.socket_addr().expect("inet").to_string(), "127.0.0.1:9000");
    assert_eq!(be.priority, 5);
    assert!(be.alive);
    assert_eq!(svc.tot_pri, 5);
    assert_eq!(svc.abs_pri, 5);
}

#[test]
fn cookie_session_synthesis() {
    let cfg = load_text(
        "Service \"s\"\n\
         \tSession\n\
         \t\tType COOKIE\n\
         \t\tID \"JSESSIONID\"\n\
         \t\tTTL 300\n\
         \tEnd\n\
         \tBackend\n\
         \t\tAddress 10.0.0.1\n\
         \t\tPort 80\n\
         \tEnd\n\
         End\n",
    )
    .expect("parse");

    let svc = &cfg.services[0];
    assert_eq!(svc.name.as_deref(), Some("s"));
    assert_eq!(svc.sess_type, SessionType::Cookie);
    assert_eq!(svc.sess_ttl, 300);

    let start = svc.sess_start.as_ref().expect("sess_start");
    assert_eq!(start.pattern(), "Cookie[^:]*:.*[ \t]JSESSIONID=");
    let pat = svc.sess_pat.as_ref().expect("sess_pat");
    assert_eq!(pat.pattern(), "([^;]*)");

    // the matcher works against raw request bytes, case folded
    let req = "GET / HTTP/1.1\ncookie: a=1; JSESSIONID=abc123; b=2\n";
    let m = start.find(req).expect("session key located");
    let rest = &req[m.end()..];
    let caps = pat.captures(rest).expect("session value");
    assert_eq!(caps.get(1).expect("group").as_str(), "abc123");
}

#[test]
fn session_types_without_id() {
    let cfg = load_text(
        "Service\n\
         \tSession\n\
         \t\tType BASIC\n\
         \t\tTTL 60\n\
         \tEnd\n\
         End\n",
    )
    .expect("parse");
    let svc = &cfg.services[0];
    assert_eq!(svc.sess_type, SessionType::Basic);
    assert_eq!(
        svc.sess_start.as_ref().expect("start").pattern(),
        "Authorization:[ \t]*Basic[ \t]*"
    );
    assert_eq!(svc.sess_pat.as_ref().expect("pat").pattern(), "([^ \t]*)");

    let cfg = load_text(
        "Service\n\tSession\n\t\tType IP\n\t\tTTL 60\n\tEnd\nEnd\n",
    )
    .expect("parse");
    let svc = &cfg.services[0];
    assert_eq!(svc.sess_type, SessionType::Ip);
    assert!(svc.sess_start.is_none());
    assert!(svc.sess_pat.is_none());
}

#[test]
fn session_requires_type_ttl_and_id() {
    let err = load_text("Service\n\tSession\n\t\tTTL 60\n\tEnd\nEnd\n").expect_err("no type");
    assert!(err.message().contains("Session type not defined"));

    let err =
        load_text("Service\n\tSession\n\t\tType IP\n\tEnd\nEnd\n").expect_err("no ttl");
    assert!(err.message().contains("Session TTL not defined"));

    let err = load_text("Service\n\tSession\n\t\tType COOKIE\n\t\tTTL 60\n\tEnd\nEnd\n")
        .expect_err("no id");
    assert!(err.message().contains("Session ID not defined"));
}

#[test]
fn redirect_with_explicit_code_trims_bare_slash() {
    let cfg = load_text("Service\n\tRedirect 307 \"https://example.org/\"\nEnd\n")
        .expect("parse");
    let svc = &cfg.services[0];
    assert_eq!(svc.backends.len(), 1);
    let be = &svc.backends[0];
    assert_eq!(be.kind, BackendKind::Redirect);
    assert_eq!(be.redir_code, 307);
    assert_eq!(be.url.as_deref(), Some("https://example.org"));
    assert_eq!(be.priority, 1);
    assert!(be.alive);
    assert_eq!(svc.tot_pri, 1);
}

#[test]
fn redirect_defaults_and_keeps_real_path() {
    let cfg = load_text("Service\n\tRedirect \"http://example.org/new\"\nEnd\n")
        .expect("parse");
    let be = &cfg.services[0].backends[0];
    assert_eq!(be.redir_code, 302);
    assert_eq!(be.url.as_deref(), Some("http://example.org/new"));
}

#[test]
fn redirect_rejects_bad_input() {
    let err = load_text("Service\n\tRedirect 303 \"http://example.org/\"\nEnd\n")
        .expect_err("bad code");
    assert!(err.message().contains("invalid status code"));

    let err = load_text("Service\n\tRedirect \"ftp://example.org/\"\nEnd\n")
        .expect_err("bad scheme");
    assert!(err.message().contains("Redirect bad URL"));
}

#[test]
fn bad_boolean_is_diagnosed() {
    let err = load_text("Service\n\tDisabled maybe\nEnd\n").expect_err("bad bool");
    assert!(err.message().contains("not a boolean value"));
}

#[test]
fn include_cycle_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("main.cfg");
    fs::write(&path, format!("Include \"{}\"\n", path.display())).expect("write");
    let err = load(&path).expect_err("cycle");
    assert!(err.message().contains("already included (at top level)"));
}

#[test]
fn include_splices_statements() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inner = write_config(
        &dir,
        "service.cfg",
        "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\tEnd\nEnd\n",
    );
    let main = write_config(
        &dir,
        "main.cfg",
        &format!("Daemon 0\nInclude \"{}\"\nThreads 16\n", inner.display()),
    );
    let cfg = load(&main).expect("parse");
    assert!(!cfg.daemonize);
    assert_eq!(cfg.threads, 16);
    assert_eq!(cfg.services.len(), 1);
}

#[test]
fn empty_service_parses_with_warning() {
    let cfg = load_text("Service\nEnd\n").expect("parse");
    let svc = &cfg.services[0];
    assert!(svc.backends.is_empty());
    assert_eq!(svc.tot_pri, 0);
    assert_eq!(svc.abs_pri, 0);
}

#[test]
fn long_service_name_is_truncated() {
    let name = "x".repeat(200);
    let cfg = load_text(&format!("Service \"{name}\"\nEnd\n")).expect("parse");
    let got = cfg.services[0].name.as_deref().expect("name");
    assert_eq!(got.len(), 127);
    assert!(name.starts_with(got));
}

#[test]
fn unix_socket_path_fallback() {
    let cfg = load_text(
        "Service\n\tBackend\n\t\tAddress /run/backend.sock\n\tEnd\nEnd\n",
    )
    .expect("parse");
    let be = &cfg.services[0].backends[0];
    assert_eq!(
        be.addr.unix_path().expect("unix").to_str().expect("utf8"),
        "/run/backend.sock"
    );
    assert!(!be.addr.has_port);
}

#[test]
fn unix_socket_path_length_is_bounded() {
    let path = format!("/{}", "a".repeat(108));
    let err = load_text(&format!(
        "Service\n\tBackend\n\t\tAddress {path}\n\tEnd\nEnd\n"
    ))
    .expect_err("too long");
    assert!(err.message().contains("UNIX path name too long"));

    let path = format!("/{}", "a".repeat(106));
    load_text(&format!("Service\n\tBackend\n\t\tAddress {path}\n\tEnd\nEnd\n"))
        .expect("107 bytes fits");
}

#[test]
fn priority_bounds() {
    let base = |p: u32| {
        format!(
            "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\t\tPriority {p}\n\tEnd\nEnd\n"
        )
    };
    let cfg = load_text(&base(9)).expect("max");
    assert_eq!(cfg.services[0].backends[0].priority, 9);
    let cfg = load_text(&base(0)).expect("min");
    assert_eq!(cfg.services[0].backends[0].priority, 0);
    assert_eq!(cfg.services[0].tot_pri, 0);

    let err = load_text(&base(10)).expect_err("too high");
    assert!(err.message().contains("value out of allowed range"));
}

#[test]
fn address_and_port_ordering_rules() {
    let err = load_text("ListenHTTP\n\tPort 8080\nEnd\n").expect_err("port first");
    assert!(err.message().contains("Address statement should precede Port"));

    let err = load_text(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tAddress 127.0.0.2\n\tPort 80\nEnd\n",
    )
    .expect_err("duplicate");
    assert!(err.message().contains("Duplicate Address statement"));

    let err = load_text("ListenHTTP\n\tAddress 127.0.0.1\nEnd\n").expect_err("no port");
    assert!(err.message().contains("ListenHTTP missing Port declaration"));

    let err = load_text("ListenHTTP\nEnd\n").expect_err("no address");
    assert!(err.message().contains("ListenHTTP missing Address declaration"));
}

#[test]
fn xhttp_selects_method_set() {
    let cfg = load_text(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\txHTTP 2\nEnd\n",
    )
    .expect("parse");
    assert_eq!(cfg.listeners[0].verb.pattern(), XHTTP[2]);
    assert!(cfg.listeners[0].verb.is_match("PROPFIND /dav HTTP/1.1"));

    let err = load_text(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\txHTTP 5\nEnd\n",
    )
    .expect_err("out of range");
    assert!(err.message().contains("argument out of allowed range"));
}

#[test]
fn haport_single_argument_inherits_address() {
    let cfg = load_text(
        "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\t\tHAport 81\n\tEnd\nEnd\n",
    )
    .expect("parse");
    let be = &cfg.services[0].backends[0];
    assert_eq!(be.ha_addr.socket_addr().expect("inet").to_string(), "10.0.0.1:81");
}

#[test]
fn haport_with_explicit_address() {
    let cfg = load_text(
        "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\t\tHAport 10.0.0.2 82\n\tEnd\nEnd\n",
    )
    .expect("parse");
    let be = &cfg.services[0].backends[0];
    assert_eq!(be.ha_addr.socket_addr().expect("inet").to_string(), "10.0.0.2:82");
}

#[test]
fn emergency_backend_uses_fixed_timeouts() {
    let cfg = load_text(
        "TimeOut 33\n\
         ConnTO 44\n\
         Service\n\
         \tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\tEnd\n\
         \tEmergency\n\t\tAddress 10.0.0.9\n\t\tPort 80\n\tEnd\n\
         End\n",
    )
    .expect("parse");
    let svc = &cfg.services[0];
    assert_eq!(svc.backends[0].to, 33);
    assert_eq!(svc.backends[0].conn_to, 44);
    let em = svc.emergency.as_ref().expect("emergency");
    assert_eq!(em.to, 120);
    assert_eq!(em.conn_to, 120);
    assert_eq!(em.ws_to, 120);
}

#[test]
fn backend_tls_statements_require_https() {
    let err = load_text(
        "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 443\n\t\tCiphers \"x\"\n\tEnd\nEnd\n",
    )
    .expect_err("no https");
    assert!(err.message().contains("HTTPS must be used before this statement"));

    let cfg = load_text(
        "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 443\n\t\tHTTPS\n\t\tDisable TLSv1\n\tEnd\nEnd\n",
    )
    .expect("https backend");
    let tls = cfg.services[0].backends[0].tls.as_ref().expect("tls");
    assert!(!tls.has_client_cert);
}

#[test]
fn unrecognized_keyword_and_syntax_errors() {
    let err = load_text("Bogus 1\n").expect_err("unknown");
    assert!(err.message().contains("unrecognized keyword"));

    let err = load_text("\"stray\"\n").expect_err("syntax");
    assert!(err.message().contains("syntax error"));

    let err = load_text("Daemon 1 2\n").expect_err("trailing token");
    assert!(err.message().contains("unexpected"));
}

#[test]
fn unterminated_section_is_an_error() {
    let err = load_text("Service\n\tDisabled 0\n").expect_err("no End");
    assert!(err.message().contains("unexpected end of file"));
}

#[test]
fn global_defaults_flow_into_backends() {
    let cfg = load_text(
        "TimeOut 120\n\
         WSTimeOut 900\n\
         ConnTO 5\n\
         Client 30\n\
         Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\tEnd\nEnd\n\
         ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\nEnd\n",
    )
    .expect("parse");
    let be = &cfg.services[0].backends[0];
    assert_eq!(be.to, 120);
    assert_eq!(be.ws_to, 900);
    assert_eq!(be.conn_to, 5);
    assert_eq!(cfg.listeners[0].to, 30);
}

#[test]
fn ignore_case_compiles_urls_at_section_close() {
    // the IgnoreCase statement comes after URL, but still applies
    let cfg = load_text(
        "Service\n\tURL \"^/API\"\n\tIgnoreCase 1\nEnd\n",
    )
    .expect("parse");
    let m = &cfg.services[0].url[0];
    assert!(m.is_match("/api/users"));

    let cfg = load_text("Service\n\tURL \"^/API\"\nEnd\n").expect("parse");
    assert!(!cfg.services[0].url[0].is_match("/api/users"));

    // global IgnoreCase sets the per-service default
    let cfg = load_text("IgnoreCase 1\nService\n\tURL \"^/API\"\nEnd\n").expect("parse");
    assert!(cfg.services[0].url[0].is_match("/api/users"));
}

#[test]
fn add_header_lines_join_with_crlf() {
    let cfg = load_text(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\
         \tAddHeader \"X-One: 1\"\n\tAddHeader \"X-Two: 2\"\nEnd\n",
    )
    .expect("parse");
    assert_eq!(cfg.listeners[0].add_head.as_deref(), Some("X-One: 1\r\nX-Two: 2"));
}

#[test]
fn check_url_allows_only_one_pattern() {
    let err = load_text(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\
         \tCheckURL \"^/a\"\n\tCheckURL \"^/b\"\nEnd\n",
    )
    .expect_err("duplicate");
    assert!(err.message().contains("CheckURL multiple pattern"));
}

#[test]
fn acme_service_synthesis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let challenge = dir.path().join("challenges");
    fs::create_dir(&challenge).expect("mkdir");

    let cfg = load_text(&format!(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\tACME \"{}/\"\nEnd\n",
        challenge.display()
    ))
    .expect("parse");

    let svc = &cfg.listeners[0].services[0];
    assert_eq!(svc.url[0].pattern(), "^/\\.well-known/acme-challenge/(.+)");
    assert!(svc.url[0].is_match("/.well-known/acme-challenge/token123"));
    assert_eq!(svc.tot_pri, 1);

    let be = &svc.backends[0];
    assert_eq!(be.kind, BackendKind::Acme);
    assert_eq!(be.priority, 1);
    let url = be.url.as_deref().expect("url");
    assert!(url.ends_with("/$1"));
    assert!(!url.ends_with("//$1"));

    let err = load_text("ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\tACME \"/nonexistent-dir\"\nEnd\n")
        .expect_err("missing dir");
    assert!(err.message().contains("can't stat"));
}

#[test]
fn top_level_settings_are_recorded() {
    let cfg = load_text(
        "User \"www\"\n\
         Group \"www\"\n\
         RootJail \"/var/empty\"\n\
         Daemon 0\n\
         Supervisor 0\n\
         Threads 8\n\
         Grace 10\n\
         Alive 5\n\
         LogFacility local3\n\
         LogLevel 3\n\
         Anonymise\n\
         Control \"/run/proxy.ctl\"\n",
    )
    .expect("parse");
    assert_eq!(cfg.user.as_deref(), Some("www"));
    assert_eq!(cfg.group.as_deref(), Some("www"));
    assert_eq!(cfg.root_jail.as_deref(), Some("/var/empty"));
    assert!(!cfg.daemonize);
    assert!(!cfg.supervisor);
    assert_eq!(cfg.threads, 8);
    assert_eq!(cfg.grace, 10);
    assert_eq!(cfg.alive_to, 5);
    assert_eq!(cfg.facility, sterling_lib::config::Facility::Local3);
    assert_eq!(cfg.log_level, 3);
    assert!(cfg.anonymise);
    assert_eq!(cfg.control_socket.as_deref(), Some("/run/proxy.ctl"));
}

#[test]
fn listener_log_level_and_err_bodies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let body = dir.path().join("404.html");
    fs::write(&body, "<h1>gone</h1>").expect("write");

    let cfg = load_text(&format!(
        "ListenHTTP\n\tAddress 127.0.0.1\n\tPort 80\n\
         \tLogLevel 4\n\tMaxRequest 1048576\n\tErr404 \"{}\"\nEnd\n",
        body.display()
    ))
    .expect("parse");
    let lst = &cfg.listeners[0];
    assert_eq!(lst.log_level, 4);
    assert_eq!(lst.max_req, 1048576);
    assert_eq!(lst.err404, "<h1>gone</h1>");
    // untouched bodies keep their defaults
    assert_eq!(lst.err503, "The service is not available. Please try again later.");
}

#[test]
fn parsing_twice_yields_identical_trees() {
    let text = "IgnoreCase 1\n\
                Service \"main\"\n\
                \tURL \"^/app\"\n\
                \tHeadRequire \"Host: .*example.org\"\n\
                \tSession\n\t\tType URL\n\t\tID \"sid\"\n\t\tTTL 120\n\tEnd\n\
                \tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\t\tPriority 7\n\tEnd\n\
                \tRedirect 301 \"https://example.org/legacy\"\n\
                End\n\
                ListenHTTP\n\tAddress 127.0.0.1\n\tPort 8080\n\txHTTP 1\nEnd\n";

    let digest = |cfg: &Config| {
        let mut out = String::new();
        for svc in &cfg.services {
            out.push_str(&format!(
                "svc {:?} tot={} abs={} sess={:?} ttl={} start={:?} urls={:?}\n",
                svc.name,
                svc.tot_pri,
                svc.abs_pri,
                svc.sess_type,
                svc.sess_ttl,
                svc.sess_start.as_ref().map(|m| m.pattern().to_string()),
                svc.url.iter().map(|m| m.pattern().to_string()).collect::<Vec<_>>(),
            ));
            for be in &svc.backends {
                out.push_str(&format!(
                    "  be {:?} {:?} pri={} url={:?} code={}\n",
                    be.kind,
                    be.addr,
                    be.priority,
                    be.url,
                    be.redir_code
                ));
            }
        }
        for lst in &cfg.listeners {
            out.push_str(&format!(
                "lst {:?} verb={} rewr={}\n",
                lst.addr,
                lst.verb.pattern(),
                lst.rewr_loc
            ));
        }
        out
    };

    let a = load_text(text).expect("first parse");
    let b = load_text(text).expect("second parse");
    assert_eq!(digest(&a), digest(&b));
}

#[test]
fn config_without_listeners_fails_validation() {
    let cfg = load_text("Service\nEnd\n").expect("parse");
    assert!(matches!(cfg.require_listeners(), Err(ConfigError::NoListeners)));
}

#[test]
fn keywords_are_case_insensitive() {
    let cfg = load_text(
        "listenhttp\n\taddress 127.0.0.1\n\tPORT 8080\nend\n",
    )
    .expect("parse");
    assert_eq!(cfg.listeners.len(), 1);
}

#[test]
fn numeric_only_addresses_when_dns_disabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "nodns.cfg",
        "Service\n\tBackend\n\t\tAddress 10.0.0.1\n\t\tPort 80\n\tEnd\nEnd\n",
    );
    let features = Features { dns: false };
    let cfg = load_from_path(&path, &features).expect("numeric still resolves");
    assert!(cfg.services[0].backends[0].addr.is_inet());

    // a hostname cannot resolve with DNS off and does not look like
    // a UNIX path either, but the fallback still applies
    let path = write_config(
        &dir,
        "nodns2.cfg",
        "Service\n\tBackend\n\t\tAddress backend.internal\n\tEnd\nEnd\n",
    );
    let cfg = load_from_path(&path, &features).expect("unix fallback");
    assert!(cfg.services[0].backends[0].addr.unix_path().is_some());
}

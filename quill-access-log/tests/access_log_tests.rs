use chrono::Utc;
use quill_access_log::pattern::{COMBINED_PATTERN, CompiledPattern, LogElement};
use quill_access_log::{AccessLogValve, LineEvaluator, TimeCache};
use quill_core::record::AccessRecord;
use quill_core::sink::LineSink;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// 2024-03-05T14:07:09Z
const NOW: i64 = 1_709_647_629_000;

// =============================================================================
// Helper Functions
// =============================================================================

fn utc_evaluator() -> LineEvaluator<Utc> {
    LineEvaluator::with_time_cache(TimeCache::new(Utc))
}

fn sample_record() -> AccessRecord {
    AccessRecord::new()
        .with_remote_addr("10.0.0.1")
        .with_request("GET", "/x", "HTTP/1.1")
        .with_status(200)
        .with_bytes_sent(0)
}

#[derive(Default)]
struct VecSink(Mutex<Vec<String>>);

impl LineSink for VecSink {
    fn log(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

// =============================================================================
// Compile Properties
// =============================================================================

#[test]
fn test_patterns_without_percent_render_verbatim() {
    let evaluator = utc_evaluator();
    for text in ["", "x", "GET /index.html", "{curly} [square] \"quoted\""] {
        let line = evaluator.render_at(
            &CompiledPattern::compile(text),
            &sample_record(),
            Duration::from_millis(3),
            NOW,
        );
        assert_eq!(line, text);
    }
}

#[test]
fn test_trailing_percent_matches_pattern_without_it() {
    for base in ["", "%h", "a %s b", "%{X}i tail"] {
        let with = CompiledPattern::compile(&format!("{base}%"));
        let without = CompiledPattern::compile(base);
        assert_eq!(with.elements(), without.elements(), "base {base:?}");
    }
}

#[test]
fn test_unterminated_brace_matches_literal_unknown_directive() {
    let broken = CompiledPattern::compile("%h %{Referer");
    assert_eq!(
        broken.elements(),
        &[
            LogElement::HostName,
            LogElement::Literal(" ".into()),
            LogElement::UnknownDirective(Some('{')),
            LogElement::Literal("Referer".into()),
        ]
    );
}

// =============================================================================
// End-to-end Rendering
// =============================================================================

#[test]
fn test_common_format_end_to_end() {
    let line = utc_evaluator().render_at(
        &CompiledPattern::compile("%h %l %u %t \"%r\" %s %b"),
        &sample_record(),
        Duration::from_millis(150),
        NOW,
    );
    assert_eq!(
        line,
        "10.0.0.1 - - [05/Mar/2024:14:07:09 +0000] \"GET /x HTTP/1.1\" 200 -"
    );
}

#[test]
fn test_combined_format_with_headers() {
    let mut rec = sample_record().with_bytes_sent(512);
    rec.request_headers
        .insert("user-agent", http::HeaderValue::from_static("curl/8.5.0"));
    let line = utc_evaluator().render_at(
        &CompiledPattern::compile(COMBINED_PATTERN),
        &rec,
        Duration::ZERO,
        NOW,
    );
    assert_eq!(
        line,
        "10.0.0.1 - - [05/Mar/2024:14:07:09 +0000] \"GET /x HTTP/1.1\" 200 512 \"-\" \"curl/8.5.0\""
    );
}

#[test]
fn test_concurrent_renders_share_one_pattern() {
    let pattern = Arc::new(CompiledPattern::compile("%a %U %T"));
    let evaluator = Arc::new(utc_evaluator());
    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let pattern = Arc::clone(&pattern);
            let evaluator = Arc::clone(&evaluator);
            std::thread::spawn(move || {
                let rec = AccessRecord::new()
                    .with_remote_addr(format!("10.0.0.{i}"))
                    .with_request("GET", format!("/t{i}"), "HTTP/1.1");
                evaluator.render_at(&pattern, &rec, Duration::from_millis(1000 + i * 10), NOW)
            })
        })
        .collect();
    let lines: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(lines[0], "10.0.0.0 /t0 1.00");
    assert_eq!(lines[3], "10.0.0.3 /t3 1.03");
}

// =============================================================================
// Valve
// =============================================================================

#[test]
fn test_valve_common_alias_end_to_end() {
    let sink = Arc::new(VecSink::default());
    let valve = AccessLogValve::with_evaluator(Arc::clone(&sink), utc_evaluator());
    valve.set_logger_name(Some("access".into()));
    valve.set_pattern("common");
    valve.start().unwrap();

    let rec = AccessRecord::new()
        .with_remote_host("remoteHost")
        .with_request("GET", "/foo/bar", "HTTP/1.1")
        .with_status(200);
    let line = valve
        .log_access_at(&rec, Duration::from_millis(150), NOW)
        .unwrap();
    assert_eq!(
        line,
        "remoteHost - - [05/Mar/2024:14:07:09 +0000] \"GET /foo/bar HTTP/1.1\" 200 -"
    );
    assert_eq!(sink.0.lock().unwrap().as_slice(), &[line]);
    valve.stop().unwrap();
}

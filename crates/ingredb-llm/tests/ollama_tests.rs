use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use ingredb_core::config::LlmSettings;
use ingredb_core::traits::TextGenerator;
use ingredb_llm::OllamaClient;

/// Serves exactly one HTTP request with `status` and `body`, handing the
/// received request body back through the join handle.
fn serve_once(status: &'static str, body: String) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") { break pos + 4; }
            assert!(n > 0, "connection closed before headers");
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map_or(0, |v| v.trim().parse().unwrap());
        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 { break; }
            buf.extend_from_slice(&chunk[..n]);
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&buf[header_end..]).into_owned()
    });
    (format!("http://{addr}"), handle)
}

fn client(base_url: String) -> OllamaClient {
    OllamaClient::new(&LlmSettings { base_url, model: "phi3".into(), timeout_secs: 5 }).unwrap()
}

#[test]
fn generate_posts_system_and_user_messages() {
    let (url, server) = serve_once("200 OK", r#"{"message":{"role":"assistant","content":"Mica is common."},"done":true}"#.into());
    let text = client(url).generate("be brief", "what is mica?").unwrap();
    assert_eq!(text, "Mica is common.");

    let request: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
    assert_eq!(request["model"], "phi3");
    assert_eq!(request["stream"], false);
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][0]["content"], "be brief");
    assert_eq!(request["messages"][1]["content"], "what is mica?");
}

#[test]
fn generate_stream_forwards_each_fragment() {
    let body = [
        r#"{"message":{"role":"assistant","content":"Titanium "},"done":false}"#,
        r#"{"message":{"role":"assistant","content":"dioxide [1]"},"done":false}"#,
        r#"{"message":{"role":"assistant","content":""},"done":true}"#,
    ]
    .join("\n");
    let (url, server) = serve_once("200 OK", body);
    let mut fragments = Vec::new();
    let text = client(url).generate_stream("sys", "q", &mut |f: &str| fragments.push(f.to_string())).unwrap();
    assert_eq!(text, "Titanium dioxide [1]");
    assert_eq!(fragments, vec!["Titanium ", "dioxide [1]"]);
    let request: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
    assert_eq!(request["stream"], true);
}

#[test]
fn http_error_status_is_an_error() {
    let (url, server) = serve_once("404 Not Found", r#"{"error":"model 'phi3' not found"}"#.into());
    let err = client(url).generate("sys", "q").unwrap_err();
    assert!(format!("{err:#}").contains("404"), "{err:#}");
    server.join().unwrap();
}

#[test]
fn unreachable_server_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    assert!(client(format!("http://{addr}")).generate("sys", "q").is_err());
}

//! Loopback HTTP stub for exercising the provider boundary in tests.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::config::HttpConfig;
use crate::http_client::HttpClient;

#[derive(Debug, Clone)]
pub(crate) enum StubReply {
    Respond {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Reads the request, then holds the socket open without answering.
    Stall(Duration),
}

impl StubReply {
    pub(crate) fn json(body: &str) -> Self {
        Self::Respond {
            status: 200,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn status(status: u16) -> Self {
        Self::Respond {
            status,
            content_type: "text/plain",
            body: b"stub error".to_vec(),
        }
    }

    pub(crate) fn png(width: u32, height: u32) -> Self {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 60, 30])))
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encoding should succeed");
        Self::Respond {
            status: 200,
            content_type: "image/png",
            body: cursor.into_inner(),
        }
    }
}

pub(crate) struct StubServer {
    listener: TcpListener,
    base_url: String,
}

impl StubServer {
    pub(crate) fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("loopback port should bind");
        let address = listener.local_addr().expect("bound listener should have an address");
        Self {
            listener,
            base_url: format!("http://{address}"),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Answers every connection by request path (query string ignored) until
    /// the test process exits. Unknown paths get a 404.
    pub(crate) fn serve(self, routes: Vec<(&'static str, StubReply)>) {
        let routes = Arc::new(routes);
        thread::spawn(move || {
            for stream in self.listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let routes = Arc::clone(&routes);
                thread::spawn(move || answer(stream, &routes));
            }
        });
    }
}

fn answer(mut stream: TcpStream, routes: &[(&'static str, StubReply)]) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) => break,
            Ok(_) if header == "\r\n" => break,
            Ok(_) => {}
            Err(_) => return,
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target);
    let reply = routes
        .iter()
        .find(|(route, _)| *route == path)
        .map(|(_, reply)| reply.clone())
        .unwrap_or_else(|| StubReply::status(404));

    match reply {
        StubReply::Stall(duration) => thread::sleep(duration),
        StubReply::Respond {
            status,
            content_type,
            body,
        } => {
            let head = format!(
                "HTTP/1.1 {status} Stub\r\nContent-Type: {content_type}\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        }
    }
}

pub(crate) fn stub_http_client(max_download_bytes: usize, read_timeout_ms: u64) -> HttpClient {
    HttpClient::new(&HttpConfig {
        connect_timeout_ms: 1_000,
        read_timeout_ms,
        max_download_bytes,
        ..HttpConfig::default()
    })
}

//! Server push (§8.4). RST_STREAM and GOAWAY coverage (§8.5, §8.6) lives
//! in `src/connection.rs`'s own test module instead: both scenarios need
//! a real header block on the wire to open a stream in the first place,
//! and HPACK is private to this crate.

use http2::{Config, Connection, Request};

#[tokio::test]
async fn server_push_delivers_to_client() {
    let _ = env_logger::try_init();
    let (client_io, server_io) = tokio::io::duplex(8192);

    let (client, server) = tokio::join!(
        Connection::connect(client_io, Config::default()),
        Connection::accept(server_io, Config::default()),
    );
    let mut client = client.expect("client handshake");
    let server = server.expect("server handshake");

    let server_task = tokio::spawn(async move {
        http2::serve(server, |_headers, response| async move {
            let pushed = response
                .push(vec![
                    (":method".to_owned(), "GET".to_owned()),
                    (":path".to_owned(), "/a.js".to_owned()),
                ])
                .await
                .unwrap();
            pushed.write_headers(200, Vec::new(), false).await.unwrap();
            pushed.write(http2::Bytes::from_static(b"console.log(1)"), true).await.unwrap();

            response.write_headers(200, Vec::new(), false).await.unwrap();
            response.write(http2::Bytes::from_static(b"<html></html>"), true).await.unwrap();
        })
        .await
    });

    let mut pushes = client.pushes().expect("pushes channel");

    let request = Request::get(
        "/",
        vec![
            (":scheme".to_owned(), "http".to_owned()),
            (":authority".to_owned(), "example".to_owned()),
        ],
    );
    let mut response = client.request(request).await.expect("request failed");
    let _ = response.read_body().await.expect("body read failed");

    let pushed_stream = pushes.recv().await.expect("expected a push");
    assert_eq!(
        pushed_stream.request_headers[1],
        (":path".to_owned(), "/a.js".to_owned())
    );
    let mut pushed_response = client.adopt_push(pushed_stream).await.expect("adopt push");
    let body = pushed_response.read_body().await.expect("pushed body read");
    assert_eq!(&body[..], b"console.log(1)");

    drop(client);
    let _ = server_task.await;
}

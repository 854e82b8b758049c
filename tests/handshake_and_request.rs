//! End-to-end scenarios driven in-process over `tokio::io::duplex`, no
//! real network and no TLS (§8 scenarios: preface, simple GET, server
//! push, GOAWAY).

use http2::{Config, Connection, Request};

#[tokio::test]
async fn preface_handshake_completes_both_sides() {
    let _ = env_logger::try_init();
    let (client_io, server_io) = tokio::io::duplex(4096);

    let client = tokio::spawn(Connection::connect(client_io, Config::default()));
    let server = tokio::spawn(Connection::accept(server_io, Config::default()));

    let client = client.await.unwrap().expect("client handshake");
    let server = server.await.unwrap().expect("server handshake");

    assert_eq!(client.role(), http2::Role::Client);
    assert_eq!(server.role(), http2::Role::Server);
}

#[tokio::test]
async fn simple_get_round_trip() {
    let _ = env_logger::try_init();
    let (client_io, server_io) = tokio::io::duplex(8192);

    let (client, server) = tokio::join!(
        Connection::connect(client_io, Config::default()),
        Connection::accept(server_io, Config::default()),
    );
    let client = client.expect("client handshake");
    let server = server.expect("server handshake");

    let server_task = tokio::spawn(async move {
        http2::serve(server, |headers, response| async move {
            assert_eq!(headers[0], (":method".to_owned(), "GET".to_owned()));
            response
                .write_headers(200, vec![("content-type".to_owned(), "text/plain".to_owned())], false)
                .await
                .unwrap();
            response.write(http2::Bytes::from_static(b"hello"), true).await.unwrap();
        })
        .await
    });

    let request = Request::get(
        "/",
        vec![
            (":scheme".to_owned(), "http".to_owned()),
            (":authority".to_owned(), "example".to_owned()),
        ],
    );
    let mut response = client.request(request).await.expect("request failed");
    assert_eq!(response.status(), 200);
    let body = response.read_body().await.expect("body read failed");
    assert_eq!(&body[..], b"hello");

    drop(client);
    let _ = server_task.await;
}

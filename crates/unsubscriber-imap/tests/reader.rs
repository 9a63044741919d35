//! Mailbox scans against a scripted in-memory server.

#![allow(clippy::unwrap_used)]

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing::Span;
use unsubscriber_imap::{Client, Error, MailReader};

/// Plays the server side: each incoming command line is answered by the
/// reply whose command text it contains.
async fn server(stream: DuplexStream, replies: Vec<(&'static str, String)>) -> Vec<String> {
    let mut stream = BufReader::new(stream);
    stream.get_mut().write_all(b"* OK test server\r\n").await.unwrap();

    let mut received = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await.unwrap() == 0 {
            return received;
        }
        let (tag, command) = line.trim_end().split_once(' ').unwrap();
        received.push(command.to_string());
        let reply = replies
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map_or_else(
                || format!("{tag} BAD unexpected\r\n"),
                |(_, reply)| reply.replace("{tag}", tag),
            );
        stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
        if command == "LOGOUT" {
            return received;
        }
    }
}

fn fetch_reply(messages: &[(u32, &str)]) -> String {
    let mut reply = String::new();
    for (n, (uid, header)) in messages.iter().enumerate() {
        reply.push_str(&format!(
            "* {} FETCH (UID {uid} BODY[HEADER.FIELDS (TO SUBJECT)] {{{}}}\r\n{header})\r\n",
            n + 1,
            header.len()
        ));
    }
    reply.push_str("{tag} OK FETCH completed\r\n");
    reply
}

fn base_replies(search: &str) -> Vec<(&'static str, String)> {
    vec![
        ("SELECT", "* 3 EXISTS\r\n{tag} OK [READ-WRITE] done\r\n".to_string()),
        ("UID SEARCH", format!("* SEARCH{search}\r\n{{tag}} OK done\r\n")),
        ("LOGOUT", "* BYE bye\r\n{tag} OK done\r\n".to_string()),
    ]
}

#[tokio::test]
async fn test_empty_mailbox_closes_stream_immediately() {
    let (client_side, server_side) = tokio::io::duplex(4096);
    let server = tokio::spawn(server(server_side, base_replies("")));

    let client = Client::from_stream(client_side).await.unwrap();
    let reader = MailReader::open(client, "INBOX").await.unwrap();
    assert!(reader.is_empty());

    let mut targets = reader.stream(Span::none());
    assert!(targets.recv().await.is_none());

    let received = server.await.unwrap();
    assert!(!received.iter().any(|c| c.starts_with("UID FETCH")));
    assert_eq!(received.last().unwrap(), "LOGOUT");
}

#[tokio::test]
async fn test_scan_streams_one_target_per_link() {
    let mut replies = base_replies(" 10 11");
    replies.push((
        "UID FETCH 10,11",
        fetch_reply(&[
            (
                10,
                "Subject: First\r\nList-Unsubscribe: <https://a.example/u>, <mailto:u@a.example>\r\n\r\n",
            ),
            (11, "Subject: Second\r\nList-Unsubscribe: <https://b.example/u>\r\n\r\n"),
        ]),
    ));
    let (client_side, server_side) = tokio::io::duplex(4096);
    let server = tokio::spawn(server(server_side, replies));

    let client = Client::from_stream(client_side).await.unwrap();
    let reader = MailReader::open(client, "INBOX").await.unwrap();
    assert_eq!(reader.len(), 2);

    let mut targets = reader.stream(Span::none());
    let mut links = Vec::new();
    while let Some(target) = targets.recv().await {
        links.push((target.subject, target.link.to_string()));
    }
    assert_eq!(
        links,
        vec![
            ("First".to_string(), "https://a.example/u".to_string()),
            ("First".to_string(), "mailto:u@a.example".to_string()),
            ("Second".to_string(), "https://b.example/u".to_string()),
        ]
    );

    let received = server.await.unwrap();
    assert!(received.iter().any(|c| c.contains("BODY.PEEK[HEADER.FIELDS")));
}

#[tokio::test]
async fn test_fetch_failure_ends_scan() {
    let mut replies = base_replies(" 4");
    replies.push(("UID FETCH", "{tag} NO fetch failed\r\n".to_string()));
    let (client_side, server_side) = tokio::io::duplex(4096);
    let server = tokio::spawn(server(server_side, replies));

    let client = Client::from_stream(client_side).await.unwrap();
    let mut targets = MailReader::open(client, "INBOX")
        .await
        .unwrap()
        .stream(Span::none());
    assert!(targets.recv().await.is_none());
    server.await.unwrap();
}

#[tokio::test]
async fn test_select_failure_is_fatal() {
    let replies = vec![("SELECT", "{tag} NO no such mailbox\r\n".to_string())];
    let (client_side, server_side) = tokio::io::duplex(4096);
    let _server = tokio::spawn(server(server_side, replies));

    let client = Client::from_stream(client_side).await.unwrap();
    assert!(matches!(
        MailReader::open(client, "Archive").await,
        Err(Error::No(_))
    ));
}

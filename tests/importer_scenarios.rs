use meremail::config::Config;
use meremail::importer;
use meremail::parser;
use meremail::store::Store;

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        auth_username: "test".to_string(),
        auth_password: "test".to_string(),
        auth_cookie_secret: "test-secret".to_string(),
        smtp_host: "smtp.example.com".to_string(),
        smtp_port: 587,
        smtp_user: "me@example.com".to_string(),
        smtp_pass: "secret".to_string(),
        smtp_secure: false,
        imap_host: "imap.example.com".to_string(),
        imap_port: 993,
        imap_user: "me@example.com".to_string(),
        imap_pass: "secret".to_string(),
        imap_secure: true,
        database_path: dir.join("meremail.db"),
        data_dir: dir.to_path_buf(),
        max_attachment_size: 20 * 1024 * 1024,
        image_proxy_url: None,
        eml_backup_enabled: false,
        default_sender_name: None,
        default_sender_email: None,
        port: 8080,
        is_production: false,
    }
}

async fn open_store(dir: &std::path::Path) -> Store {
    Store::open(&dir.join("meremail.db")).await.unwrap()
}

#[tokio::test]
async fn header_threading_groups_reply_with_its_original() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let config = test_config(dir.path());

    let original = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Project plan\r\nMessage-ID: <orig@example.com>\r\nContent-Type: text/plain\r\n\r\nHere is the plan.\r\n";
    let reply = b"From: Bob <bob@example.com>\r\nTo: alice@example.com\r\nSubject: Re: Project plan\r\nMessage-ID: <reply@example.com>\r\nIn-Reply-To: <orig@example.com>\r\nContent-Type: text/plain\r\n\r\nLooks good.\r\n";

    let parsed_orig = parser::parse(original, "INBOX", &[]).unwrap();
    let outcome_orig = importer::import(&store, &config, &parsed_orig, original, "INBOX", None, &[])
        .await
        .unwrap();
    assert!(outcome_orig.imported);

    let parsed_reply = parser::parse(reply, "INBOX", &[]).unwrap();
    let outcome_reply = importer::import(&store, &config, &parsed_reply, reply, "INBOX", None, &[])
        .await
        .unwrap();
    assert!(outcome_reply.imported);

    assert_eq!(outcome_orig.thread_id, outcome_reply.thread_id);
}

#[tokio::test]
async fn subject_fallback_threading_when_no_header_match() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let config = test_config(dir.path());

    let original = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Lunch Friday\r\nMessage-ID: <orig2@example.com>\r\nContent-Type: text/plain\r\n\r\nSee you then.\r\n";
    let reply = b"From: Bob <bob@example.com>\r\nTo: alice@example.com\r\nSubject: RE: Lunch Friday\r\nMessage-ID: <reply2@example.com>\r\nContent-Type: text/plain\r\n\r\nSounds good.\r\n";

    let parsed_orig = parser::parse(original, "INBOX", &[]).unwrap();
    let outcome_orig = importer::import(&store, &config, &parsed_orig, original, "INBOX", None, &[])
        .await
        .unwrap();

    let parsed_reply = parser::parse(reply, "INBOX", &[]).unwrap();
    let outcome_reply = importer::import(&store, &config, &parsed_reply, reply, "INBOX", None, &[])
        .await
        .unwrap();

    assert_eq!(outcome_orig.thread_id, outcome_reply.thread_id);
}

#[tokio::test]
async fn unrelated_subject_creates_a_new_thread() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let config = test_config(dir.path());

    let first = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Topic A\r\nMessage-ID: <a@example.com>\r\nContent-Type: text/plain\r\n\r\nHello\r\n";
    let second = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Topic B\r\nMessage-ID: <b@example.com>\r\nContent-Type: text/plain\r\n\r\nHello again\r\n";

    let parsed_first = parser::parse(first, "INBOX", &[]).unwrap();
    let outcome_first = importer::import(&store, &config, &parsed_first, first, "INBOX", None, &[])
        .await
        .unwrap();

    let parsed_second = parser::parse(second, "INBOX", &[]).unwrap();
    let outcome_second = importer::import(&store, &config, &parsed_second, second, "INBOX", None, &[])
        .await
        .unwrap();

    assert_ne!(outcome_first.thread_id, outcome_second.thread_id);
}

#[tokio::test]
async fn duplicate_message_id_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let config = test_config(dir.path());

    let raw = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Once\r\nMessage-ID: <dup@example.com>\r\nContent-Type: text/plain\r\n\r\nHello\r\n";

    let parsed = parser::parse(raw, "INBOX", &[]).unwrap();
    let first = importer::import(&store, &config, &parsed, raw, "INBOX", None, &[])
        .await
        .unwrap();
    assert!(first.imported);

    let second = importer::import(&store, &config, &parsed, raw, "INBOX", None, &[])
        .await
        .unwrap();
    assert!(!second.imported);
    assert_eq!(second.skip_reason, Some(importer::SkipReason::Duplicate));
}

#[tokio::test]
async fn impostor_mail_in_junk_is_rewritten_to_a_synthetic_sender() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let config = test_config(dir.path());

    // Seed `me@example.com` as a trusted identity via a sent message first.
    let sent = b"From: Me <me@example.com>\r\nTo: someone@example.com\r\nSubject: Outbound\r\nMessage-ID: <sent@example.com>\r\nContent-Type: text/plain\r\n\r\nHi\r\n";
    let parsed_sent = parser::parse(sent, "Sent", &[]).unwrap();
    importer::import(&store, &config, &parsed_sent, sent, "Sent", None, &[])
        .await
        .unwrap();

    let me = store.find_contact_by_email("me@example.com").await.unwrap().unwrap();
    assert!(me.is_me);

    let spoofed = b"From: Me <me@example.com>\r\nTo: me@example.com\r\nSubject: Claim your prize\r\nMessage-ID: <spoof@example.com>\r\nContent-Type: text/plain\r\n\r\nClick here\r\n";
    let parsed_spoofed = parser::parse(spoofed, "Junk", &[]).unwrap();
    let outcome = importer::import(&store, &config, &parsed_spoofed, spoofed, "Junk", None, &[])
        .await
        .unwrap();
    assert!(outcome.imported);

    let message = store.get_message(outcome.message_db_id.unwrap()).await.unwrap();
    let sender = store.get_contact(message.sender_id).await.unwrap();
    assert_eq!(sender.email, "impostor@impostor");
}

#[tokio::test]
async fn thread_creator_is_reassigned_to_the_earliest_sender() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let config = test_config(dir.path());

    let later = b"From: Bob <bob@example.com>\r\nTo: alice@example.com\r\nSubject: Status\r\nMessage-ID: <later@example.com>\r\nDate: Wed, 02 Jul 2025 10:00:00 +0000\r\nContent-Type: text/plain\r\n\r\nUpdate\r\n";
    let earlier = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Re: Status\r\nMessage-ID: <earlier@example.com>\r\nIn-Reply-To: <later@example.com>\r\nDate: Wed, 01 Jul 2025 09:00:00 +0000\r\nContent-Type: text/plain\r\n\r\nKickoff\r\n";

    let parsed_later = parser::parse(later, "INBOX", &[]).unwrap();
    let outcome_later = importer::import(&store, &config, &parsed_later, later, "INBOX", None, &[])
        .await
        .unwrap();

    let parsed_earlier = parser::parse(earlier, "INBOX", &[]).unwrap();
    importer::import(&store, &config, &parsed_earlier, earlier, "INBOX", None, &[])
        .await
        .unwrap();

    let thread = store.get_thread(outcome_later.thread_id.unwrap()).await.unwrap();
    let creator = store.get_contact(thread.creator_id).await.unwrap();
    assert_eq!(creator.email, "alice@example.com");
}

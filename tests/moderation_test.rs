mod common;

use common::{addr, test_server, wait_for_slots, TestClient};
use rusty_chat::constants::BLOCKED_MESSAGE;

#[tokio::test]
async fn test_admin_blocks_user() {
    let server = test_server();
    let mut admin = TestClient::login_admin(&server, addr(1)).await;
    let mut eve = TestClient::login(&server, addr(66), "eve").await;
    admin.expect_eventually("eve joined the chat room lobby.").await;

    admin.send("/block eve spam").await;
    eve.expect_line("You have been blocked. Reason: spam").await;
    eve.expect_closed().await;
    admin
        .expect_eventually("Blocked eve (10.0.0.66) with id 1.")
        .await;
    wait_for_slots(&server, 1).await;

    admin.send("/listblock").await;
    admin.expect_eventually("Active blocks:").await;
    let entry = admin.next_line().await;
    assert!(entry.starts_with("[1] eve (10.0.0.66) blocked "), "{}", entry);
    assert!(entry.ends_with(": spam"), "{}", entry);

    // The address is refused before it gets a slot
    let mut again = TestClient::connect(&server, addr(66));
    again.expect_line(BLOCKED_MESSAGE).await;
    assert!(again.expect_closed().await.is_empty());
    assert_eq!(server.sessions().used_slots().unwrap(), 1);

    admin.send("/unblock 1").await;
    admin.expect_line("Unblocked eve (10.0.0.66).").await;
    admin.send("/listblock").await;
    admin.expect_line("No active blocks.").await;
    let _eve = TestClient::login(&server, addr(66), "eve").await;
}

#[tokio::test]
async fn test_block_defaults_reason_and_validates() {
    let server = test_server();
    let mut admin = TestClient::login_admin(&server, addr(1)).await;
    let mut mallory = TestClient::login(&server, addr(7), "mallory").await;
    admin.expect_eventually("mallory joined the chat room lobby.").await;

    admin.send("/block ghost").await;
    admin.expect_line("User ghost is not logged in").await;

    admin.send("/block admin").await;
    admin.expect_line("You cannot block yourself").await;

    admin.send("/unblock 42").await;
    admin.expect_line("No block entry with id 42").await;

    admin.send("/unblock abc").await;
    admin.expect_line("Usage: /unblock <id>").await;

    admin.send("/block mallory").await;
    mallory
        .expect_line("You have been blocked. Reason: No reason given")
        .await;
    mallory.expect_closed().await;
}

#[tokio::test]
async fn test_admin_commands_require_admin() {
    let server = test_server();
    let mut alice = TestClient::login(&server, addr(1), "alice").await;
    let _bob = TestClient::login(&server, addr(2), "bob").await;
    alice.expect_eventually("bob joined the chat room lobby.").await;

    for command in ["/kick bob", "/block bob", "/listblock", "/broadcast hi"] {
        alice.send(command).await;
        alice
            .expect_line_starting("Permission denied: /")
            .await;
    }
    assert_eq!(server.sessions().used_slots().unwrap(), 2);
}

#[tokio::test]
async fn test_kick_and_kickall() {
    let server = test_server();
    let mut admin = TestClient::login_admin(&server, addr(1)).await;
    let mut alice = TestClient::login(&server, addr(2), "alice").await;
    let mut bob = TestClient::login(&server, addr(3), "bob").await;
    let mut carol = TestClient::login(&server, addr(4), "carol").await;
    admin.expect_eventually("carol joined the chat room lobby.").await;

    admin.send("/kick alice").await;
    alice
        .expect_eventually("You have been kicked by an administrator.")
        .await;
    alice.expect_closed().await;
    admin.expect_eventually("Kicked alice.").await;

    bob.send("/createchatroom party").await;
    bob.expect_eventually("Chat room party created.").await;
    bob.send("/joinchatroom party").await;
    bob.expect_line("bob joined the chat room party.").await;
    carol.send("/joinchatroom party").await;
    carol.expect_eventually("carol joined the chat room party.").await;

    admin.send("/kickall party").await;
    bob.expect_eventually("You have been kicked by an administrator.")
        .await;
    carol
        .expect_eventually("You have been kicked by an administrator.")
        .await;
    bob.expect_closed().await;
    carol.expect_closed().await;
    admin.expect_eventually("Kicked 2 users from party.").await;

    wait_for_slots(&server, 1).await;
    assert!(server.rooms().find_by_name("party").unwrap().is_none());
}

#[tokio::test]
async fn test_admin_broadcast_reaches_every_room() {
    let server = test_server();
    let mut admin = TestClient::login_admin(&server, addr(1)).await;
    let mut alice = TestClient::login(&server, addr(2), "alice").await;
    let mut bob = TestClient::login(&server, addr(3), "bob").await;
    admin.expect_eventually("bob joined the chat room lobby.").await;

    bob.send("/createchatroom side").await;
    bob.expect_eventually("Chat room side created.").await;
    bob.send("/joinchatroom side").await;
    bob.expect_line("bob joined the chat room side.").await;
    bob.send("/mute admin").await;
    bob.expect_line("admin cannot be muted").await;

    admin.send("/broadcast server restarting soon").await;
    alice
        .expect_eventually("[broadcast] server restarting soon")
        .await;
    bob.expect_eventually("[broadcast] server restarting soon")
        .await;
    admin
        .expect_eventually("[broadcast] server restarting soon")
        .await;
}

#[tokio::test]
async fn test_unknown_command_and_help() {
    let server = test_server();
    let mut alice = TestClient::login(&server, addr(1), "alice").await;

    alice.send("/dance wildly").await;
    alice.expect_line("Invalid command: dance").await;
    alice.expect_line("Type /help for a list of commands.").await;

    alice.send("/").await;
    alice.expect_line("Invalid command: (empty)").await;
    alice.expect_line("Type /help for a list of commands.").await;

    alice.send("/HELP whisper").await;
    alice.expect_line("Usage: /whisper <user> <message>").await;
    alice.expect_line("  send a private message").await;

    alice.send("/help kick").await;
    alice.expect_line("No help available for kick").await;

    alice.send("/help").await;
    alice.expect_line("Available commands:").await;
    let listing = alice.expect_eventually("  /changeusername <name> - change your username").await;
    assert!(listing.iter().any(|line| line.starts_with("  /logout")));
    assert!(listing.iter().all(|line| !line.contains("/kick")));

    alice.send("/logout extra").await;
    alice.expect_line("Usage: /logout").await;
}

#[tokio::test]
async fn test_admin_cannot_rename() {
    let server = test_server();
    let mut admin = TestClient::login_admin(&server, addr(1)).await;

    admin.send("/changeusername boss").await;
    admin
        .expect_line("Permission denied: the administrator cannot change name")
        .await;

    admin.send("/help").await;
    admin.expect_eventually("Administrator commands:").await;
    admin.expect_line("  /kick <user> - disconnect a user").await;
}

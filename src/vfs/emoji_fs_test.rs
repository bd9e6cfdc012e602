use std::{sync::Arc, time::Duration};

use camino::Utf8Path;
use rstest::{fixture, rstest};
use rustix::io::Errno;

use super::EmojiFs;
use crate::{
    store::{EmojiStore, MediaType, MemoryStore, Platform, testing::GatedStore},
    vfs::{Error, FileKind, MAX_EMOJI_SIZE, Namespace, OpenFlags, RenameMap, Vfs},
};

const PARROT: &[u8] = b"GIF89a-parrot";
const DOCKER_FIRE: &[u8] = b"GIF89a-docker-fire";
const BLOB: &[u8] = b"\x89PNG\r\n\x1a\n-blob";

struct Fixture {
    fs: Arc<EmojiFs>,
    slack: Arc<GatedStore>,
    discord: Arc<MemoryStore>,
}

#[fixture]
fn fixture() -> Fixture {
    let slack = GatedStore::new(MemoryStore::new("xooglers").with_emoji(
        "parrot",
        MediaType::Gif,
        PARROT,
    ));
    let discord = Arc::new(
        MemoryStore::new("unchaind")
            .with_emoji("docker-fire", MediaType::Gif, DOCKER_FIRE)
            .uploaded_by("docker-fire", "cdanis")
            .with_emoji("parrot", MediaType::Gif, PARROT)
            .with_alias("partyparrot", "parrot")
            .with_emoji("dog.gif", MediaType::Gif, b"GIF89a-dog".as_slice())
            .with_emoji("dog.png", MediaType::Png, b"\x89PNG\r\n\x1a\n-dog".as_slice()),
    );
    let archive = Arc::new(
        MemoryStore::new("archive")
            .with_emoji("old", MediaType::Png, BLOB)
            .read_only(),
    );

    let renames = RenameMap::new().rename(Platform::SLACK, "xooglers-enterprise", "xooglers");
    let namespace = Namespace::builder(renames)
        .store(Platform::SLACK, "xooglers-enterprise", slack.clone())
        .store(Platform::DISCORD, "unchaind", discord.clone())
        .store(Platform::LOCAL, "archive", archive)
        .build();

    Fixture {
        fs: Arc::new(EmojiFs::new(namespace)),
        slack,
        discord,
    }
}

async fn ls(fs: &EmojiFs, path: &str) -> Vec<String> {
    fs.read_dir(Utf8Path::new(path))
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

async fn read_all(fs: &EmojiFs, path: &str) -> Result<Vec<u8>, Error> {
    let handle = fs.open(Utf8Path::new(path), OpenFlags::READ).await?;

    let mut content = Vec::new();
    while let Some(chunk) = fs.read(&handle, content.len(), 4).await? {
        content.extend(chunk);
    }
    fs.close(handle).await?;

    Ok(content)
}

async fn write_all(fs: &EmojiFs, path: &str, content: &[u8]) -> Result<(), Error> {
    let handle = fs
        .open(
            Utf8Path::new(path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        )
        .await?;
    fs.write(&handle, 0, content).await?;
    fs.close(handle).await
}

/// Fails the test instead of hanging if `future` waits on a held-up store.
async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(1), future)
        .await
        .expect("blocked on the store")
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[rstest]
#[tokio::test]
async fn test_root_and_platform_listing(fixture: Fixture) {
    let fs = &fixture.fs;

    assert_eq!(ls(fs, "/").await, ["discord", "local", "slack"]);
    assert_eq!(ls(fs, "/slack").await, ["xooglers"]);
    assert_eq!(
        ls(fs, "/discord/unchaind").await,
        [
            "docker-fire.gif",
            "dog.gif",
            "dog.png",
            "parrot.gif",
            "partyparrot.gif"
        ]
    );
}

#[rstest]
#[tokio::test]
async fn test_rename_map_routing(fixture: Fixture) {
    let fs = &fixture.fs;

    assert_eq!(
        read_all(fs, "/slack/xooglers/parrot.gif").await.unwrap(),
        PARROT
    );
    assert!(matches!(
        fs.stat(Utf8Path::new("/slack/xooglers-enterprise")).await,
        Err(Error::NotFound(_))
    ));
}

#[rstest]
#[case("/discord/unchaind/parrot")]
#[case("/discord/unchaind/parrot.gif")]
#[tokio::test]
async fn test_extension_transparency(fixture: Fixture, #[case] path: &str) {
    let fs = &fixture.fs;

    assert_eq!(read_all(fs, path).await.unwrap(), PARROT);
    let metadata = fs.stat(Utf8Path::new(path)).await.unwrap();
    assert_eq!(metadata.kind, FileKind::File);

    fs.remove_file(Utf8Path::new(path)).await.unwrap();

    assert!(matches!(
        fixture.discord.fetch("parrot").await,
        Err(crate::store::StoreError::NotFound(_))
    ));
    for path in ["/discord/unchaind/parrot", "/discord/unchaind/parrot.gif"] {
        assert!(matches!(
            fs.stat(Utf8Path::new(path)).await,
            Err(Error::NotFound(_))
        ));
    }
}

#[rstest]
#[tokio::test]
async fn test_no_overwrite_then_delete_then_write(fixture: Fixture) {
    let fs = &fixture.fs;
    let path = "/slack/xooglers/parrot.gif";
    let replacement = b"GIF89a-new-parrot";

    let err = write_all(fs, path, replacement).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(err.errno(), Errno::EXIST);
    let err = write_all(fs, "/slack/xooglers/parrot", replacement)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(read_all(fs, path).await.unwrap(), PARROT);

    fs.remove_file(Utf8Path::new(path)).await.unwrap();
    write_all(fs, path, replacement).await.unwrap();

    assert_eq!(read_all(fs, path).await.unwrap(), replacement);
}

#[rstest]
#[tokio::test]
async fn test_listing_reflects_writes_without_requery(fixture: Fixture) {
    let fs = &fixture.fs;

    assert_eq!(ls(fs, "/slack/xooglers").await, ["parrot.gif"]);
    assert_eq!(fixture.slack.list_calls(), 1);
    fixture.slack.set_gate(false);

    write_all(fs, "/slack/xooglers/blob.png", BLOB)
        .await
        .unwrap();
    assert_eq!(
        within(ls(fs, "/slack/xooglers")).await,
        ["blob.png", "parrot.gif"]
    );

    within(fs.remove_file(Utf8Path::new("/slack/xooglers/parrot")))
        .await
        .unwrap();
    assert_eq!(
        within(ls(fs, "/slack/xooglers")).await,
        ["blob.png"]
    );

    fixture.slack.set_gate(true);
    settle().await;
    assert_eq!(ls(fs, "/slack/xooglers").await, ["blob.png"]);
}

#[rstest]
#[tokio::test]
async fn test_failed_refresh_is_reported(fixture: Fixture) {
    let fs = &fixture.fs;
    let store_dir = Utf8Path::new("/slack/xooglers");

    ls(fs, store_dir.as_str()).await;
    write_all(fs, "/slack/xooglers/blob.png", BLOB)
        .await
        .unwrap();
    fixture.slack.fail_next_list();

    assert_eq!(
        ls(fs, store_dir.as_str()).await,
        ["blob.png", "parrot.gif"]
    );
    settle().await;

    let err = fs.read_dir(store_dir).await.unwrap_err();
    assert!(matches!(err, Error::Backend { .. }));
    assert_eq!(err.errno(), Errno::IO);

    assert_eq!(
        ls(fs, store_dir.as_str()).await,
        ["blob.png", "parrot.gif"]
    );
    settle().await;
    assert_eq!(fixture.slack.list_calls(), 3);
}

#[rstest]
#[tokio::test]
async fn test_single_flight_listing(fixture: Fixture) {
    fixture.slack.set_gate(false);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let fs = fixture.fs.clone();
            tokio::spawn(async move { ls(&fs, "/slack/xooglers").await })
        })
        .collect();
    settle().await;
    fixture.slack.set_gate(true);

    for task in tasks {
        assert_eq!(task.await.unwrap(), ["parrot.gif"]);
    }
    assert_eq!(fixture.slack.list_calls(), 1);
}

#[rstest]
#[tokio::test]
async fn test_cross_store_copy(fixture: Fixture) {
    let fs = &fixture.fs;

    let content = read_all(fs, "/discord/unchaind/docker-fire.gif")
        .await
        .unwrap();
    write_all(fs, "/slack/xooglers/docker-fire", &content)
        .await
        .unwrap();

    assert_eq!(
        fixture.slack.fetch("docker-fire").await.unwrap(),
        DOCKER_FIRE
    );
    assert!(
        ls(fs, "/slack/xooglers")
            .await
            .contains(&"docker-fire.gif".to_owned())
    );
    assert_eq!(
        read_all(fs, "/discord/unchaind/docker-fire.gif")
            .await
            .unwrap(),
        DOCKER_FIRE
    );
}

#[rstest]
#[tokio::test]
async fn test_alias_lists_with_unknown_size(fixture: Fixture) {
    let fs = &fixture.fs;

    let listing = fs
        .read_dir(Utf8Path::new("/discord/unchaind"))
        .await
        .unwrap();
    let (_, alias) = listing
        .iter()
        .find(|(name, _)| name == "partyparrot.gif")
        .unwrap();
    assert_eq!(alias.kind, FileKind::Symlink);
    assert_eq!(alias.size, None);

    assert_eq!(
        read_all(fs, "/discord/unchaind/partyparrot").await.unwrap(),
        PARROT
    );
    let metadata = fs
        .stat(Utf8Path::new("/discord/unchaind/partyparrot.gif"))
        .await
        .unwrap();
    assert_eq!(metadata.size, None);
    assert_eq!(
        fs.readlink(Utf8Path::new("/discord/unchaind/partyparrot"))
            .await
            .unwrap(),
        "parrot.gif"
    );
}

#[rstest]
#[tokio::test]
async fn test_fetch_records_size(fixture: Fixture) {
    let fs = &fixture.fs;
    let path = Utf8Path::new("/slack/xooglers/parrot.gif");

    read_all(fs, path.as_str()).await.unwrap();

    assert_eq!(
        fs.stat(path).await.unwrap().size,
        Some(PARROT.len() as u64)
    );
}

#[rstest]
#[tokio::test]
async fn test_names_ending_in_their_extension_stay_distinct(fixture: Fixture) {
    let fs = &fixture.fs;
    let second = b"GIF89a-second-parrot";
    fixture
        .discord
        .create("parrot.gif", second.to_vec(), MediaType::Gif)
        .await
        .unwrap();

    let names = ls(fs, "/discord/unchaind").await;
    assert!(names.contains(&"parrot.gif".to_owned()));
    assert!(names.contains(&"parrot.gif.gif".to_owned()));
    let mut unique = names.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), names.len());

    assert_eq!(
        read_all(fs, "/discord/unchaind/parrot.gif").await.unwrap(),
        PARROT
    );
    assert_eq!(
        read_all(fs, "/discord/unchaind/parrot.gif.gif")
            .await
            .unwrap(),
        second
    );
}

#[rstest]
#[tokio::test]
async fn test_ambiguous_bare_name(fixture: Fixture) {
    let fs = &fixture.fs;

    let err = fs
        .stat(Utf8Path::new("/discord/unchaind/dog"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AmbiguousName { .. }));
    assert_eq!(err.errno(), Errno::NOENT);

    assert!(read_all(fs, "/discord/unchaind/dog.png").await.is_ok());
}

#[rstest]
#[tokio::test]
async fn test_write_buffer_is_visible(fixture: Fixture) {
    let fs = &fixture.fs;
    let path = Utf8Path::new("/slack/xooglers/blob.png");

    let handle = fs
        .open(path, OpenFlags::WRITE | OpenFlags::CREATE)
        .await
        .unwrap();
    fs.write(&handle, 0, BLOB).await.unwrap();

    let metadata = fs.stat(path).await.unwrap();
    assert_eq!(metadata.size, Some(BLOB.len() as u64));
    assert_eq!(metadata.permissions, 0o600);
    assert_eq!(
        fs.read(&handle, 0, 4).await.unwrap().unwrap(),
        &BLOB[..4]
    );
    assert!(matches!(
        fs.open(path, OpenFlags::WRITE | OpenFlags::CREATE).await,
        Err(Error::AlreadyExists(_))
    ));

    fs.write(&handle, BLOB.len(), b"-trailer").await.unwrap();
    fs.truncate(&handle, BLOB.len()).await.unwrap();
    assert_eq!(
        fs.stat_fd(&handle).await.unwrap().size,
        Some(BLOB.len() as u64)
    );

    fs.close(handle).await.unwrap();
    assert_eq!(read_all(fs, path.as_str()).await.unwrap(), BLOB);
}

#[rstest]
#[tokio::test]
async fn test_oversized_writes_are_refused(fixture: Fixture) {
    let fs = &fixture.fs;
    let path = Utf8Path::new("/slack/xooglers/blob.png");

    let handle = fs
        .open(path, OpenFlags::WRITE | OpenFlags::CREATE)
        .await
        .unwrap();
    fs.write(&handle, 0, BLOB).await.unwrap();

    let err = fs.write(&handle, usize::MAX, b"x").await.unwrap_err();
    assert!(matches!(err, Error::TooLarge(_)));
    assert_eq!(err.errno(), Errno::FBIG);
    assert!(matches!(
        fs.write(&handle, MAX_EMOJI_SIZE, b"x").await,
        Err(Error::TooLarge(_))
    ));
    assert!(matches!(
        fs.truncate(&handle, usize::MAX).await,
        Err(Error::TooLarge(_))
    ));
    assert_eq!(
        fs.stat_fd(&handle).await.unwrap().size,
        Some(BLOB.len() as u64)
    );

    fs.close(handle).await.unwrap();
    assert_eq!(read_all(fs, path.as_str()).await.unwrap(), BLOB);
}

#[rstest]
#[tokio::test]
async fn test_name_stays_reserved_until_upload_finishes(fixture: Fixture) {
    let fs = &fixture.fs;
    ls(fs, "/slack/xooglers").await;
    fixture.slack.set_create_gate(false);

    let upload = tokio::spawn({
        let fs = fixture.fs.clone();
        async move { write_all(&fs, "/slack/xooglers/blob.png", BLOB).await }
    });
    settle().await;

    assert!(matches!(
        within(fs.open(
            Utf8Path::new("/slack/xooglers/blob"),
            OpenFlags::WRITE | OpenFlags::CREATE
        ))
        .await,
        Err(Error::AlreadyExists(_))
    ));

    fixture.slack.set_create_gate(true);
    within(upload).await.unwrap().unwrap();
    assert_eq!(
        ls(fs, "/slack/xooglers").await,
        ["blob.png", "parrot.gif"]
    );
}

#[rstest]
#[case("/slack/xooglers/blob.webp", "invalid name")]
#[case("/slack/xooglers/blob", "invalid content")]
#[tokio::test]
async fn test_rejected_writes(fixture: Fixture, #[case] path: &str, #[case] reason: &str) {
    let fs = &fixture.fs;

    let err = write_all(fs, path, b"plain text").await.unwrap_err();

    match reason {
        "invalid name" => assert!(matches!(err, Error::InvalidName(_))),
        _ => assert!(matches!(err, Error::InvalidContent(_))),
    }
    assert_eq!(ls(fs, "/slack/xooglers").await, ["parrot.gif"]);
}

#[rstest]
#[tokio::test]
async fn test_failed_close_frees_the_name(fixture: Fixture) {
    let fs = &fixture.fs;

    write_all(fs, "/slack/xooglers/blob", b"").await.unwrap_err();

    write_all(fs, "/slack/xooglers/blob", BLOB).await.unwrap();
    assert_eq!(
        ls(fs, "/slack/xooglers").await,
        ["blob.png", "parrot.gif"]
    );
}

#[rstest]
#[tokio::test]
async fn test_read_only_store(fixture: Fixture) {
    let fs = &fixture.fs;

    let err = write_all(fs, "/local/archive/new.png", BLOB)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnly(_)));
    assert_eq!(err.errno(), Errno::ACCESS);
    assert!(matches!(
        fs.remove_file(Utf8Path::new("/local/archive/old.png")).await,
        Err(Error::ReadOnly(_))
    ));
    assert_eq!(
        fs.stat(Utf8Path::new("/local/archive"))
            .await
            .unwrap()
            .permissions,
        0o555
    );
}

#[rstest]
#[tokio::test]
async fn test_unsupported_operations(fixture: Fixture) {
    let fs = &fixture.fs;

    let err = fs
        .rename(
            Utf8Path::new("/slack/xooglers/parrot.gif"),
            Utf8Path::new("/slack/xooglers/birb.gif"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.errno(), Errno::OPNOTSUPP);

    assert!(matches!(
        fs.mkdir(Utf8Path::new("/slack/xooglers")).await,
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        fs.mkdir(Utf8Path::new("/slack/new")).await,
        Err(Error::NotSupported(_))
    ));
    assert!(matches!(
        fs.remove_dir(Utf8Path::new("/slack/xooglers")).await,
        Err(Error::NotSupported(_))
    ));
    assert!(matches!(
        fs.open(Utf8Path::new("/slack"), OpenFlags::READ).await,
        Err(Error::IsADirectory(_))
    ));
}

#[rstest]
#[tokio::test]
async fn test_symlink_creates_alias(fixture: Fixture) {
    let fs = &fixture.fs;

    fs.symlink(
        Utf8Path::new("/slack/xooglers/birb.gif"),
        Utf8Path::new("parrot.gif"),
    )
    .await
    .unwrap();

    assert_eq!(
        fs.readlink(Utf8Path::new("/slack/xooglers/birb"))
            .await
            .unwrap(),
        "parrot.gif"
    );
    assert_eq!(
        read_all(fs, "/slack/xooglers/birb.gif").await.unwrap(),
        PARROT
    );
    assert!(matches!(
        fs.readlink(Utf8Path::new("/slack/xooglers/parrot")).await,
        Err(Error::NotASymlink(_))
    ));

    assert!(matches!(
        fs.symlink(
            Utf8Path::new("/slack/xooglers/fire.gif"),
            Utf8Path::new("/discord/unchaind/docker-fire.gif"),
        )
        .await,
        Err(Error::NotSupported(_))
    ));
}

#[rstest]
#[tokio::test]
async fn test_xattrs(fixture: Fixture) {
    let fs = &fixture.fs;
    let path = Utf8Path::new("/discord/unchaind/parrot.gif");

    assert_eq!(fs.list_xattr(path).await.unwrap(), ["user.url"]);
    assert_eq!(
        fs.get_xattr(path, "user.url").await.unwrap(),
        b"memory://unchaind/parrot.gif"
    );
    let err = fs.get_xattr(path, "user.created_by").await.unwrap_err();
    assert_eq!(err.errno(), Errno::NODATA);

    let uploaded = Utf8Path::new("/discord/unchaind/docker-fire.gif");
    assert_eq!(
        fs.list_xattr(uploaded).await.unwrap(),
        ["user.url", "user.created_by"]
    );
    assert_eq!(
        fs.get_xattr(uploaded, "user.created_by").await.unwrap(),
        b"cdanis"
    );
}

#[rstest]
#[tokio::test]
async fn test_store_dir_times_follow_entries(fixture: Fixture) {
    let fs = &fixture.fs;
    let store_dir = Utf8Path::new("/slack/xooglers");

    assert_eq!(fs.stat(store_dir).await.unwrap().mtime, None);

    write_all(fs, "/slack/xooglers/blob.png", BLOB)
        .await
        .unwrap();
    let metadata = fs.stat(store_dir).await.unwrap();

    assert!(metadata.mtime.is_some());
    assert_eq!(metadata.mtime, metadata.ctime);
    assert_eq!(metadata.permissions, 0o755);
}

#[rstest]
#[tokio::test]
async fn test_closed_handles_are_rejected(fixture: Fixture) {
    let fs = &fixture.fs;

    let handle = fs
        .open(Utf8Path::new("/slack/xooglers/parrot"), OpenFlags::READ)
        .await
        .unwrap();
    assert!(matches!(
        fs.write(&handle, 0, b"x").await,
        Err(Error::BadHandle)
    ));
    fs.close(handle).await.unwrap();

    assert!(matches!(fs.close(handle).await, Err(Error::BadHandle)));
    assert!(matches!(
        fs.read(&handle, 0, 1).await,
        Err(Error::BadHandle)
    ));
}

#[rstest]
#[tokio::test]
async fn test_invalidate_all_relists(fixture: Fixture) {
    let fs = &fixture.fs;

    ls(fs, "/slack/xooglers").await;
    fs.invalidate_all();
    ls(fs, "/slack/xooglers").await;

    assert_eq!(fixture.slack.list_calls(), 2);
}

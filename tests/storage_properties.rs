use std::sync::atomic::{AtomicUsize, Ordering};

use firebase_typed::app::{AppRegistry, BackendConfig};
use firebase_typed::storage::{
    ListOptions, StorageClient, StorageErrorCode, StringFormat, UploadEvent, UploadTaskState,
};

fn storage() -> StorageClient {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let name = format!("storage-props-{}", NEXT.fetch_add(1, Ordering::SeqCst));
    AppRegistry::in_memory()
        .create(
            BackendConfig::new("demo")
                .with_name(name)
                .with_storage_bucket("demo.appspot.com"),
        )
        .unwrap()
        .storage()
        .unwrap()
}

#[tokio::test]
async fn paginated_listing_splits_three_then_two() {
    let storage = storage();
    let folder = storage.reference("photos");
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"] {
        storage
            .upload_bytes(&folder.child(name), vec![0u8; 4], None)
            .await
            .unwrap();
    }

    let first = storage
        .list(&folder, ListOptions::with_max_results(3))
        .await
        .unwrap();
    assert_eq!(first.items.len(), 3);
    let token = first.next_page_token.clone().unwrap();
    assert!(!token.is_empty());

    let second = storage
        .list(&folder, ListOptions::with_max_results(3).page_token(token))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 2);
    assert!(second.next_page_token.is_none());

    let mut names: Vec<String> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|item| item.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
}

#[tokio::test]
async fn list_all_reports_prefixes_and_items() {
    let storage = storage();
    for path in ["docs/readme.md", "docs/guides/intro.md", "docs/api/index.md"] {
        storage
            .upload_string(&storage.reference(path), "# doc", StringFormat::Raw, None)
            .await
            .unwrap();
    }

    let listing = storage.list_all(&storage.reference("docs")).await.unwrap();
    let items: Vec<&str> = listing.items.iter().map(|item| item.full_path()).collect();
    let prefixes: Vec<&str> = listing.prefixes.iter().map(|prefix| prefix.full_path()).collect();
    assert_eq!(items, vec!["docs/readme.md"]);
    assert_eq!(prefixes, vec!["docs/api", "docs/guides"]);
}

#[tokio::test]
async fn deleting_missing_object_succeeds_but_download_fails() {
    let storage = storage();
    let ghost = storage.reference("ghost.txt");
    storage.delete_object(&ghost).await.unwrap();

    let err = storage.get_bytes(&ghost, None).await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::ObjectNotFound);

    let note = storage.reference("note.txt");
    storage.upload_bytes(&note, b"hi".to_vec(), None).await.unwrap();
    storage.delete_object(&note).await.unwrap();
    let err = storage.get_bytes(&note, None).await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::ObjectNotFound);
    let err = storage.get_download_url(&note).await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::ObjectNotFound);
}

#[tokio::test]
async fn download_url_embeds_token_and_bytes_truncate() {
    let storage = storage();
    let note = storage.reference("notes/hello world.txt");
    storage
        .upload_string(&note, "aGVsbG8gd29ybGQ=", StringFormat::Base64, None)
        .await
        .unwrap();

    let url = storage.get_download_url(&note).await.unwrap();
    assert!(url.starts_with(
        "https://firebasestorage.googleapis.com/v0/b/demo.appspot.com/o/notes%2Fhello%20world.txt?alt=media&token="
    ));

    assert_eq!(&storage.get_bytes(&note, None).await.unwrap()[..], b"hello world");
    assert_eq!(&storage.get_bytes(&note, Some(5)).await.unwrap()[..], b"hello");
}

#[tokio::test]
async fn resumable_upload_reports_completion() {
    let storage = storage();
    let video = storage.reference("videos/clip.bin");
    let task = storage
        .upload_bytes_resumable(&video, vec![7u8; 1024], None)
        .unwrap();
    let events = task.subscribe();

    let result = task.wait().await.unwrap();
    assert_eq!(result.metadata.size, 1024);
    assert_eq!(task.snapshot().state, UploadTaskState::Success);

    let mut completed = false;
    while let Ok(event) = events.recv().await {
        if matches!(event, UploadEvent::Completed(_)) {
            completed = true;
        }
    }
    assert!(completed);
}

use async_trait::async_trait;
use bytes::Bytes;
use shardstore_core::{
    BLOCK_SIZE, BlockRef, BlockShard, BlockStore, DeleteFileOperation, DeleteFileOperationOutcome,
    DeleteFileOperationRequest, DownloadFileOperation, DownloadFileOperationOutcome,
    DownloadFileOperationRequest, FileSnapshot, HashPlacement, LatencyProbe, MetadataError,
    MetadataService, MetadataStore, NearestPlacement, Placement, Result, RetryPolicy, ShardSet,
    StoreError, UploadFileOperation, UploadFileOperationRequest, compute_hash, split_blocks,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct Cluster {
    _dirs: Vec<TempDir>,
    stores: Vec<Arc<BlockStore>>,
    shards: ShardSet,
    meta: Arc<MetadataStore>,
}

fn cluster(shard_count: usize) -> Cluster {
    let mut dirs = Vec::new();
    let mut stores = Vec::new();
    for _ in 0..shard_count {
        let dir = tempfile::tempdir().unwrap();
        stores.push(Arc::new(BlockStore::new(dir.path().to_path_buf()).unwrap()));
        dirs.push(dir);
    }
    let shards = ShardSet::new(
        stores
            .iter()
            .map(|store| store.clone() as Arc<dyn BlockShard>)
            .collect(),
    );
    let meta = Arc::new(MetadataStore::new(shards.clone()));
    Cluster {
        _dirs: dirs,
        stores,
        shards,
        meta,
    }
}

/// Wraps the real store, replaying queued stale reads and rejections first.
struct ScriptedMetadata {
    inner: Arc<MetadataStore>,
    stale_reads: Mutex<VecDeque<u64>>,
    modify_rejections: Mutex<VecDeque<StoreError>>,
    modify_versions: Mutex<Vec<u64>>,
}

impl ScriptedMetadata {
    fn new(inner: Arc<MetadataStore>) -> Self {
        Self {
            inner,
            stale_reads: Mutex::new(VecDeque::new()),
            modify_rejections: Mutex::new(VecDeque::new()),
            modify_versions: Mutex::new(Vec::new()),
        }
    }

    fn stale_read(self, version: u64) -> Self {
        self.stale_reads.lock().unwrap().push_back(version);
        self
    }

    fn reject_modify(self, error: StoreError) -> Self {
        self.modify_rejections.lock().unwrap().push_back(error);
        self
    }

    fn modify_versions(&self) -> Vec<u64> {
        self.modify_versions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataService for ScriptedMetadata {
    async fn read_file(&self, filename: &str) -> Result<FileSnapshot> {
        let stale = self.stale_reads.lock().unwrap().pop_front();
        match stale {
            Some(version) => Ok(FileSnapshot {
                version,
                hashlist: Vec::new(),
            }),
            None => self.inner.read_file(filename).await,
        }
    }

    async fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: Vec<BlockRef>,
    ) -> Result<u64> {
        self.modify_versions.lock().unwrap().push(version);
        let rejection = self.modify_rejections.lock().unwrap().pop_front();
        match rejection {
            Some(error) => Err(error),
            None => self.inner.modify_file(filename, version, hashlist).await,
        }
    }

    async fn delete_file(&self, filename: &str, version: u64) -> Result<u64> {
        self.inner.delete_file(filename, version).await
    }
}

/// Puts every block on one fixed shard.
struct FixedPlacement(u32);

#[async_trait]
impl Placement for FixedPlacement {
    async fn assign(&self, hashes: &[String], _shards: &ShardSet) -> Result<Vec<u32>> {
        Ok(vec![self.0; hashes.len()])
    }
}

fn three_blocks() -> (Bytes, Vec<u8>) {
    let mut data = Vec::new();
    data.extend(vec![b'a'; BLOCK_SIZE]);
    data.extend(vec![b'b'; BLOCK_SIZE]);
    data.extend(b"tail of the file");
    (Bytes::from(data.clone()), data)
}

fn uploader(
    metadata: Arc<dyn MetadataService>,
    cl: &Cluster,
    attempts: u32,
) -> UploadFileOperation {
    UploadFileOperation::new(metadata, cl.shards.clone(), RetryPolicy::immediate(attempts))
}

fn upload_request(
    filename: &str,
    data: Bytes,
    placement: Arc<dyn Placement>,
) -> UploadFileOperationRequest {
    UploadFileOperationRequest {
        filename: filename.to_string(),
        blocks: split_blocks(data),
        placement,
    }
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let cl = cluster(2);
    let upload = uploader(cl.meta.clone(), &cl, 8);
    let (data, expected) = three_blocks();

    let result = upload
        .run(upload_request("report.bin", data, Arc::new(HashPlacement)))
        .await
        .unwrap();
    assert_eq!(result.version, 1);
    assert_eq!(result.hashlist.len(), 3);
    assert_eq!(result.uploaded_blocks, 3);
    assert_eq!(result.attempts, 2);

    for block in &result.hashlist {
        let owner = &cl.stores[block.shard as usize];
        assert!(owner.has_block(&block.hash).await.unwrap());
    }

    let dest = tempfile::tempdir().unwrap();
    let download = DownloadFileOperation::new(cl.meta.clone(), cl.shards.clone());
    let outcome = download
        .run(DownloadFileOperationRequest {
            filename: "report.bin".to_string(),
            destination_dir: dest.path().to_path_buf(),
        })
        .await
        .unwrap();

    let DownloadFileOperationOutcome::Downloaded(downloaded) = outcome else {
        panic!("expected the file to be found");
    };
    assert_eq!(downloaded.version, 1);
    assert_eq!(downloaded.block_count, 3);
    assert_eq!(tokio::fs::read(&downloaded.path).await.unwrap(), expected);

    let leftovers: Vec<_> = std::fs::read_dir(dest.path()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}

#[tokio::test]
async fn reupload_skips_blocks_already_stored() {
    let cl = cluster(3);
    let upload = uploader(cl.meta.clone(), &cl, 8);
    let (data, _) = three_blocks();

    upload
        .run(upload_request("f", data.clone(), Arc::new(HashPlacement)))
        .await
        .unwrap();
    let second = upload
        .run(upload_request("f", data, Arc::new(HashPlacement)))
        .await
        .unwrap();

    assert_eq!(second.version, 2);
    assert_eq!(second.uploaded_blocks, 0);
    assert_eq!(second.attempts, 1);
}

#[tokio::test]
async fn single_block_lands_on_its_assigned_shard() {
    let cl = cluster(2);
    let scripted = Arc::new(ScriptedMetadata::new(cl.meta.clone()));
    let upload = uploader(scripted.clone(), &cl, 4);
    let data = Bytes::from_static(b"hello shard zero");
    let hash = compute_hash(&data);

    let result = upload
        .run(upload_request("a.txt", data, Arc::new(FixedPlacement(0))))
        .await
        .unwrap();

    assert_eq!(result.uploaded_blocks, 1);
    assert_eq!(scripted.modify_versions(), vec![1, 1]);
    assert!(cl.stores[0].has_block(&hash).await.unwrap());
    assert!(!cl.stores[1].has_block(&hash).await.unwrap());
    assert_eq!(
        cl.meta.read_file("a.txt").await.unwrap(),
        FileSnapshot {
            version: 1,
            hashlist: vec![BlockRef::new(hash, 0)],
        }
    );
}

#[tokio::test]
async fn losing_creator_refences_and_wins_next_version() {
    let cl = cluster(2);
    let upload_a = uploader(cl.meta.clone(), &cl, 8);
    upload_a
        .run(upload_request("b.txt", Bytes::from_static(b"writer a"), Arc::new(HashPlacement)))
        .await
        .unwrap();

    // writer b read the file before a committed
    let scripted = Arc::new(ScriptedMetadata::new(cl.meta.clone()).stale_read(0));
    let upload_b = uploader(scripted.clone(), &cl, 8);
    let result = upload_b
        .run(upload_request("b.txt", Bytes::from_static(b"writer b"), Arc::new(HashPlacement)))
        .await
        .unwrap();

    assert_eq!(result.version, 2);
    assert_eq!(scripted.modify_versions()[0], 1);
    let snapshot = cl.meta.read_file("b.txt").await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.hashlist, result.hashlist);
}

#[tokio::test]
async fn concurrent_uploads_both_commit_in_sequence() {
    let cl = cluster(2);
    let mut handles = Vec::new();
    for content in [&b"first writer"[..], &b"second writer"[..]] {
        let upload = uploader(cl.meta.clone(), &cl, 16);
        let request = upload_request(
            "race.txt",
            Bytes::copy_from_slice(content),
            Arc::new(HashPlacement),
        );
        handles.push(tokio::spawn(async move { upload.run(request).await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    results.sort_by_key(|result| result.version);

    assert_eq!(results[0].version, 1);
    assert_eq!(results[1].version, 2);
    let snapshot = cl.meta.read_file("race.txt").await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.hashlist, results[1].hashlist);
}

#[tokio::test]
async fn wrong_version_moves_candidate_past_current() {
    let cl = cluster(1);
    for version in 1..=4 {
        cl.meta.modify_file("f", version, Vec::new()).await.unwrap();
    }

    let scripted = Arc::new(
        ScriptedMetadata::new(cl.meta.clone())
            .stale_read(1)
            .reject_modify(MetadataError::WrongVersion { current: 4 }.into()),
    );
    let upload = uploader(scripted.clone(), &cl, 8);
    let result = upload
        .run(upload_request("f", Bytes::from_static(b"payload"), Arc::new(HashPlacement)))
        .await
        .unwrap();

    assert_eq!(scripted.modify_versions(), vec![2, 5, 5]);
    assert_eq!(result.version, 5);
}

#[tokio::test]
async fn sustained_conflicts_exhaust_the_retry_budget() {
    let cl = cluster(1);
    let mut scripted = ScriptedMetadata::new(cl.meta.clone());
    for current in 0..10 {
        scripted = scripted.reject_modify(MetadataError::WrongVersion { current }.into());
    }
    let scripted = Arc::new(scripted);

    let upload = uploader(scripted.clone(), &cl, 3);
    let error = upload
        .run(upload_request("hot", Bytes::from_static(b"x"), Arc::new(HashPlacement)))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        StoreError::RetriesExhausted {
            operation: "upload",
            attempts: 3,
            ..
        }
    ));
    assert_eq!(scripted.modify_versions().len(), 3);
}

#[tokio::test]
async fn single_attempt_budget_still_pushes_then_commits() {
    let cl = cluster(2);
    let upload = uploader(cl.meta.clone(), &cl, 1);
    let data = Bytes::from_static(b"fresh content");
    let hash = compute_hash(&data);

    let result = upload
        .run(upload_request("fresh.txt", data, Arc::new(FixedPlacement(1))))
        .await
        .unwrap();

    assert_eq!(result.version, 1);
    assert_eq!(result.uploaded_blocks, 1);
    assert_eq!(result.attempts, 2);
    assert_eq!(
        cl.meta.read_file("fresh.txt").await.unwrap(),
        FileSnapshot {
            version: 1,
            hashlist: vec![BlockRef::new(hash, 1)],
        }
    );
}

#[tokio::test]
async fn single_attempt_budget_gives_up_on_first_conflict() {
    let cl = cluster(1);
    let scripted = Arc::new(
        ScriptedMetadata::new(cl.meta.clone())
            .reject_modify(MetadataError::WrongVersion { current: 3 }.into()),
    );

    let upload = uploader(scripted.clone(), &cl, 1);
    let error = upload
        .run(upload_request("hot", Bytes::from_static(b"x"), Arc::new(HashPlacement)))
        .await
        .unwrap_err();

    assert!(matches!(error, StoreError::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(scripted.modify_versions(), vec![1]);
}

#[tokio::test]
async fn transport_failure_is_fatal() {
    let cl = cluster(1);
    let scripted = Arc::new(
        ScriptedMetadata::new(cl.meta.clone())
            .reject_modify(StoreError::Http("connection reset".to_string())),
    );
    let upload = uploader(scripted.clone(), &cl, 8);
    let error = upload
        .run(upload_request("f", Bytes::from_static(b"x"), Arc::new(HashPlacement)))
        .await
        .unwrap_err();

    assert!(matches!(error, StoreError::Http(_)));
    assert_eq!(scripted.modify_versions().len(), 1);
}

#[tokio::test]
async fn nearest_placement_puts_whole_file_on_one_shard() {
    struct PathLengthProbe;

    #[async_trait]
    impl LatencyProbe for PathLengthProbe {
        async fn measure_latency(&self, endpoint: &str) -> Result<Duration> {
            let index = endpoint.len() % 7;
            Ok(Duration::from_millis(100 + index as u64))
        }
    }

    let cl = cluster(3);
    let placement = NearestPlacement::new(PathLengthProbe);
    let expected = placement.nearest_shard(&cl.shards).await.unwrap();

    let upload = uploader(cl.meta.clone(), &cl, 8);
    let (data, _) = three_blocks();
    let result = upload
        .run(upload_request("near.bin", data, Arc::new(placement)))
        .await
        .unwrap();

    assert!(result.hashlist.iter().all(|block| block.shard == expected));
    for block in &result.hashlist {
        assert!(cl.stores[expected as usize].has_block(&block.hash).await.unwrap());
    }
}

#[tokio::test]
async fn delete_lifecycle_through_client() {
    let cl = cluster(1);
    let delete = DeleteFileOperation::new(cl.meta.clone(), RetryPolicy::immediate(8));
    let request = || DeleteFileOperationRequest {
        filename: "gone.txt".to_string(),
    };

    assert_eq!(delete.run(request()).await.unwrap(), DeleteFileOperationOutcome::NotFound);

    cl.meta.modify_file("gone.txt", 1, Vec::new()).await.unwrap();
    assert_eq!(
        delete.run(request()).await.unwrap(),
        DeleteFileOperationOutcome::Deleted { version: 2 }
    );
    assert_eq!(delete.run(request()).await.unwrap(), DeleteFileOperationOutcome::NotFound);
    assert_eq!(cl.meta.read_file("gone.txt").await.unwrap().version, 2);
}

#[tokio::test]
async fn delete_with_stale_version_follows_wrong_version() {
    let cl = cluster(1);
    cl.meta.modify_file("f", 1, Vec::new()).await.unwrap();
    cl.meta.modify_file("f", 2, Vec::new()).await.unwrap();

    let scripted = Arc::new(ScriptedMetadata::new(cl.meta.clone()).stale_read(1));
    let delete = DeleteFileOperation::new(scripted, RetryPolicy::immediate(8));
    let outcome = delete
        .run(DeleteFileOperationRequest {
            filename: "f".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(outcome, DeleteFileOperationOutcome::Deleted { version: 3 });
}

#[tokio::test]
async fn download_of_missing_or_tombstoned_file_is_not_found() {
    let cl = cluster(1);
    let download = DownloadFileOperation::new(cl.meta.clone(), cl.shards.clone());
    let dest = tempfile::tempdir().unwrap();
    let request = |filename: &str| DownloadFileOperationRequest {
        filename: filename.to_string(),
        destination_dir: dest.path().to_path_buf(),
    };

    assert_eq!(
        download.run(request("nope")).await.unwrap(),
        DownloadFileOperationOutcome::NotFound
    );

    let upload = uploader(cl.meta.clone(), &cl, 8);
    upload
        .run(upload_request("old", Bytes::from_static(b"content"), Arc::new(HashPlacement)))
        .await
        .unwrap();
    cl.meta.delete_file("old", 2).await.unwrap();

    assert_eq!(
        download.run(request("old")).await.unwrap(),
        DownloadFileOperationOutcome::NotFound
    );
    assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_block_fetch_leaves_no_partial_file() {
    let cl = cluster(2);
    let good = Bytes::from_static(b"present block");
    let good_hash = compute_hash(&good);
    cl.stores[0].store_block(&good_hash, good).await.unwrap();

    // Commit through the store against a shard set that claims every block
    // exists, then download from the real shards.
    struct Liar;

    #[async_trait]
    impl BlockShard for Liar {
        fn endpoint(&self) -> &str {
            "liar"
        }

        async fn has_block(&self, _hash: &str) -> Result<bool> {
            Ok(true)
        }

        async fn store_block(&self, _hash: &str, _data: Bytes) -> Result<()> {
            Ok(())
        }

        async fn get_block(&self, hash: &str) -> Result<Bytes> {
            Err(StoreError::BlockNotFound(hash.to_string()))
        }
    }

    let lying = Arc::new(MetadataStore::new(ShardSet::new(vec![
        Arc::new(Liar) as Arc<dyn BlockShard>,
        Arc::new(Liar) as Arc<dyn BlockShard>,
    ])));
    let missing_hash = compute_hash(b"never stored");
    lying
        .modify_file(
            "broken",
            1,
            vec![BlockRef::new(good_hash, 0), BlockRef::new(missing_hash.clone(), 1)],
        )
        .await
        .unwrap();

    let dest = tempfile::tempdir().unwrap();
    let download = DownloadFileOperation::new(lying, cl.shards.clone());
    let error = download
        .run(DownloadFileOperationRequest {
            filename: "broken".to_string(),
            destination_dir: dest.path().to_path_buf(),
        })
        .await
        .unwrap_err();

    assert!(matches!(error, StoreError::BlockNotFound(hash) if hash == missing_hash));
    assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
}

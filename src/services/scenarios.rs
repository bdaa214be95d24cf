// src/services/scenarios.rs
//! End-to-end flows across the claim, root and proof services.

use crate::claims::{Claim, ClaimKind, RegisteredDocument};
use crate::error::Error;
use crate::merkletree::verify_proof;
use crate::models::credential::CredentialInput;
use crate::models::did::DidDocument;
use crate::services::root_service::CommitOutcome;
use crate::storage::credential_store::StoredCredential;
use crate::testutil::{content_credential, Fixture};
use crate::utils::multihash::to_hex;
use crate::wallet::KeyManager;

fn article(fx: &Fixture, n: u32) -> CredentialInput {
    CredentialInput::Signed(fx.sign(content_credential(&fx.did, &format!("https://ap.com/article/{n}"))))
}

async fn commit(fx: &Fixture) -> crate::storage::root_commits::RootCommit {
    match fx.roots.commit_current_root().await.unwrap() {
        CommitOutcome::Committed(commit) => commit,
        CommitOutcome::NoOp => panic!("expected a commit"),
    }
}

#[tokio::test]
async fn happy_path_content_credential() {
    let fx = Fixture::with_tree().await;
    let vc = fx.sign(content_credential(&fx.did, "https://ap.com/article/1"));
    let receipt = fx.claims.claim_content(&vc).await.unwrap();
    assert_eq!(receipt.root_claim.version, 1);

    let commit = commit(&fx).await;
    assert_eq!(commit.block_number, 2);

    let proof = fx.proofs.generate_proof(&CredentialInput::Signed(vc.clone())).await.unwrap();
    assert_eq!(proof.block_number, 2);
    assert_eq!(proof.root, commit.root);
    assert_eq!(proof.tx_hash.as_deref(), Some(commit.tx_hash.as_str()));
    assert_eq!(proof.did_root_exists_version, 1);

    // replay against the root published on the ledger
    let published = crate::merkletree::Hash(fx.ledger.submitted()[0]);
    assert!(verify_proof(
        &proof.did_root,
        &proof.exists_in_did_mt_proof,
        &proof.claim_entry.slot(),
        &proof.claim_entry.hvalue()
    ));
    assert!(verify_proof(
        &published,
        &proof.did_root_exists_proof,
        &proof.did_root_claim_entry.slot(),
        &proof.did_root_claim_entry.hvalue()
    ));
    assert!(proof.verify());

    let stored = fx
        .claims
        .get_credential_by_multihash(&to_hex(&receipt.multihash))
        .await
        .unwrap();
    assert!(matches!(stored, StoredCredential::Signed { credential, .. } if credential == vc));
}

#[tokio::test]
async fn proof_before_commit() {
    let fx = Fixture::with_tree().await;
    let input = article(&fx, 1);
    if let CredentialInput::Signed(vc) = &input {
        fx.claims.claim_content(vc).await.unwrap();
    }
    let proof = fx.proofs.generate_proof(&input).await.unwrap();
    assert_eq!(proof.block_number, -1);
    assert_eq!(proof.root, fx.claims.root_tree().root().await.unwrap());
    assert!(proof.verify());
}

#[tokio::test]
async fn revocation() {
    let fx = Fixture::with_tree().await;
    let vc = fx.sign(content_credential(&fx.did, "https://ap.com/article/1"));
    fx.claims.claim_content(&vc).await.unwrap();
    commit(&fx).await;

    let input = CredentialInput::Signed(vc);
    fx.claims.revoke(&input).await.unwrap();
    commit(&fx).await;
    assert!(matches!(fx.proofs.generate_proof(&input).await, Err(Error::Revoked)));

    let documents: Vec<RegisteredDocument> = fx
        .claims
        .get_merkle_tree_claims_for_did(&fx.did)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|c| match c {
            Claim::RegisteredDocument(rd) => Some(rd),
            _ => None,
        })
        .collect();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].entry().unwrap().hindex(), documents[1].entry().unwrap().hindex());
    let mut versions: Vec<u32> = documents.iter().map(|d| d.version).collect();
    versions.sort();
    assert_eq!(versions, vec![0, 1]);
}

#[tokio::test]
async fn unauthorized_signer() {
    let fx = Fixture::with_tree().await;
    let extra = KeyManager::generate();
    let document = DidDocument::new(
        fx.did.clone(),
        vec![fx.keys.document_key(&fx.did, "key-1"), extra.document_key(&fx.did, "key-2")],
    );
    fx.documents.put(&document).await.unwrap();

    let vc = extra
        .sign_credential(content_credential(&fx.did, "https://ap.com/article/1"), &format!("{}#key-2", fx.did))
        .unwrap();
    let err = fx.claims.claim_content(&vc).await.unwrap_err();
    assert!(matches!(err, Error::SignerNotAuthorized));
    assert_eq!(fx.claims.next_version_for(&fx.did).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_content_claim() {
    let fx = Fixture::with_tree().await;
    let vc = fx.sign(content_credential(&fx.did, "https://ap.com/article/1"));
    fx.claims.claim_content(&vc).await.unwrap();
    let size = fx.claims.get_merkle_tree_claims_for_did(&fx.did).await.unwrap().len();

    assert!(matches!(fx.claims.claim_content(&vc).await, Err(Error::DuplicateClaim)));
    assert_eq!(fx.claims.get_merkle_tree_claims_for_did(&fx.did).await.unwrap().len(), size);
    assert_eq!(size, 2);
}

#[tokio::test]
async fn noop_commit() {
    let fx = Fixture::with_tree().await;
    fx.claims.claim_content(&fx.sign(content_credential(&fx.did, "https://ap.com/a"))).await.unwrap();
    commit(&fx).await;
    assert_eq!(fx.roots.commit_current_root().await.unwrap(), CommitOutcome::NoOp);
    assert_eq!(fx.roots.commits().count().await.unwrap(), 1);
    assert_eq!(fx.ledger.submitted().len(), 1);
}

#[tokio::test]
async fn root_claim_versions_increase_without_gaps() {
    let fx = Fixture::with_tree().await;
    for n in 0..3 {
        if let CredentialInput::Signed(vc) = article(&fx, n) {
            fx.claims.claim_content(&vc).await.unwrap();
        }
    }
    let mut versions: Vec<u32> = fx
        .claims
        .root_tree()
        .entries()
        .await
        .unwrap()
        .iter()
        .map(|e| match Claim::classify(e).unwrap() {
            Claim::SetRootKey(srk) => srk.version,
            other => panic!("unexpected {:?}", other.kind()),
        })
        .collect();
    versions.sort();
    assert_eq!(versions, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn proof_pins_the_committed_root() {
    let fx = Fixture::with_tree().await;
    let first = article(&fx, 1);
    if let CredentialInput::Signed(vc) = &first {
        fx.claims.claim_content(vc).await.unwrap();
    }
    let committed = commit(&fx).await;

    // a later claim moves the live root but not the committed one
    if let CredentialInput::Signed(vc) = article(&fx, 2) {
        fx.claims.claim_content(&vc).await.unwrap();
    }
    assert_eq!(fx.claims.next_version_for(&fx.did).await.unwrap(), 3);

    let proof = fx.proofs.generate_proof(&first).await.unwrap();
    assert_eq!(proof.root, committed.root);
    assert_eq!(proof.did_root_exists_version, 1);
    assert!(proof.verify());

    // the second credential is not provable until the next commit
    let second = article(&fx, 2);
    assert!(matches!(fx.proofs.generate_proof(&second).await, Err(Error::NotFound(_))));
    commit(&fx).await;
    assert_eq!(fx.proofs.generate_proof(&second).await.unwrap().did_root_exists_version, 2);
}

#[tokio::test]
async fn revocation_is_idempotent() {
    let fx = Fixture::with_tree().await;
    let input = article(&fx, 1);
    if let CredentialInput::Signed(vc) = &input {
        fx.claims.claim_content(vc).await.unwrap();
    }
    fx.claims.revoke(&input).await.unwrap();
    assert!(matches!(fx.claims.revoke(&input).await, Err(Error::AlreadyRevoked)));

    let revocations = fx
        .claims
        .get_merkle_tree_claims_for_did(&fx.did)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| matches!(c, Claim::RegisteredDocument(rd) if rd.is_revocation()))
        .count();
    assert_eq!(revocations, 1);
}

#[tokio::test]
async fn trees_of_different_dids_are_isolated() {
    let fx = Fixture::with_tree().await;
    let (other, _) = fx.add_identity("did:ethuri:second").await;
    if let CredentialInput::Signed(vc) = article(&fx, 1) {
        fx.claims.claim_content(&vc).await.unwrap();
    }
    let theirs = fx.claims.get_merkle_tree_claims_for_did(&other).await.unwrap();
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].kind(), ClaimKind::AuthKey);
    assert_eq!(fx.claims.get_merkle_tree_claims_for_did(&fx.did).await.unwrap().len(), 2);
}

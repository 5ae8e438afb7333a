//! Service-level tests for the account lifecycle: bootstrap, signup,
//! verification, password reset, fetch redaction, and update permissions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rosterr::config::AdminConfig;
use rosterr::db::Store;
use rosterr::db::repositories::account::verify_password;
use rosterr::mail::{MailError, Mailer};
use rosterr::models::account::{Account, Role, RoleSet};
use rosterr::services::{
    AccountError, AccountService, SeaOrmAccountService, SignupCommand, UpdateCommand,
};
use rosterr::session::AuthContext;

const APP_URL: &str = "http://localhost:6791";

#[derive(Debug, Clone)]
struct SentMail {
    to: String,
    subject: String,
    body: String,
}

/// Records outbound mail instead of sending it.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Fails every send with a transport error.
struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Err(MailError::Address("nowhere".parse::<lettre::Address>().unwrap_err()))
    }
}

async fn test_store() -> Store {
    let db_path = std::env::temp_dir().join(format!("rosterr-test-{}.db", uuid::Uuid::new_v4()));
    Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to open test store")
}

fn service_with(mailer: Arc<dyn Mailer>) -> SeaOrmAccountService {
    SeaOrmAccountService::new(mailer, APP_URL.to_string(), AdminConfig::default())
}

async fn setup() -> (Store, SeaOrmAccountService, Arc<RecordingMailer>) {
    let store = test_store().await;
    let mailer = Arc::new(RecordingMailer::default());
    let service = service_with(mailer.clone());
    (store, service, mailer)
}

async fn signup(
    store: &Store,
    service: &SeaOrmAccountService,
    email: &str,
    name: &str,
) -> (Account, AuthContext) {
    let ctx = AuthContext::anonymous();
    let mut uow = store.begin().await.unwrap();
    let account = service
        .signup(
            &mut uow,
            &ctx,
            SignupCommand {
                email: email.to_string(),
                name: name.to_string(),
                password: "swordfish".to_string(),
            },
        )
        .await
        .unwrap();
    uow.commit().await.unwrap();
    (account, ctx)
}

async fn bootstrap(store: &Store, service: &SeaOrmAccountService) {
    let mut uow = store.begin().await.unwrap();
    service.bootstrap_admin(&mut uow).await.unwrap();
    uow.commit().await.unwrap();
}

async fn reload(store: &Store, id: i64) -> Account {
    store.accounts().get_by_id(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn bootstrap_is_idempotent() {
    let (store, service, mailer) = setup().await;

    bootstrap(&store, &service).await;
    bootstrap(&store, &service).await;

    let admin = store
        .accounts()
        .find_by_email(&AdminConfig::default().email)
        .await
        .unwrap()
        .expect("bootstrap admin missing");

    assert!(admin.is_admin());
    assert!(!admin.is_unverified());
    assert_eq!(admin.verification_code, None);
    assert_eq!(admin.name, AdminConfig::default().name);
    assert!(verify_password(&AdminConfig::default().password, &admin.password_hash).unwrap());

    // No verification step for the bootstrap admin, so no mail either.
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn signup_creates_unverified_account_and_mails_link() {
    let (store, service, mailer) = setup().await;

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;

    let stored = reload(&store, account.id).await;
    assert_eq!(stored.roles, RoleSet::of(&[Role::Unverified]));
    assert_ne!(stored.password_hash, "swordfish");
    assert!(verify_password("swordfish", &stored.password_hash).unwrap());

    let code = stored.verification_code.clone().expect("missing code");
    assert!(!code.is_empty());

    // Commit hooks: session established, then mail with the embedded link.
    let current = ctx.current().await.expect("signup did not log in");
    assert_eq!(current.id, account.id);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");
    assert!(sent[0].body.contains(&format!("{APP_URL}/accounts/{code}/verify")));
}

#[tokio::test]
async fn signup_survives_mail_outage() {
    let store = test_store().await;
    let service = service_with(Arc::new(FailingMailer));

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;

    // The account-side state change must not be undone by the mail failure,
    // and the session is still established.
    assert!(store.accounts().get_by_id(account.id).await.unwrap().is_some());
    assert!(ctx.current().await.is_some());
}

#[tokio::test]
async fn resend_surfaces_mail_failures() {
    let store = test_store().await;
    let service = service_with(Arc::new(FailingMailer));

    // Signup swallows the transport failure...
    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;

    // ...but resend has nothing committed to protect: the caller asked for
    // exactly that mail, so the failure comes back to them.
    let mut uow = store.begin().await.unwrap();
    let err = service
        .resend_verification_mail(&mut uow, &ctx, account.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::Mail(_)));

    // The stored code is untouched by the failed resend.
    assert!(reload(&store, account.id).await.verification_code.is_some());
}

#[tokio::test]
async fn rolled_back_signup_fires_no_side_effects() {
    let (store, service, mailer) = setup().await;

    let ctx = AuthContext::anonymous();
    let mut uow = store.begin().await.unwrap();
    service
        .signup(
            &mut uow,
            &ctx,
            SignupCommand {
                email: "a@x.com".to_string(),
                name: "A".to_string(),
                password: "swordfish".to_string(),
            },
        )
        .await
        .unwrap();
    uow.rollback().await.unwrap();

    assert!(store.accounts().find_by_email("a@x.com").await.unwrap().is_none());
    assert!(mailer.sent().is_empty());
    assert!(ctx.current().await.is_none());
}

#[tokio::test]
async fn verify_consumes_the_code_exactly_once() {
    let (store, service, _mailer) = setup().await;

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;
    let code = reload(&store, account.id).await.verification_code.unwrap();

    let mut uow = store.begin().await.unwrap();
    service.verify(&mut uow, &ctx, &code).await.unwrap();
    uow.commit().await.unwrap();

    let stored = reload(&store, account.id).await;
    assert!(!stored.is_unverified());
    assert_eq!(stored.verification_code, None);

    // Session identity refreshed with the new role set.
    assert!(!ctx.current().await.unwrap().is_unverified());

    // Second attempt with the same code: nothing left to verify.
    let mut uow = store.begin().await.unwrap();
    let err = service.verify(&mut uow, &ctx, &code).await.unwrap_err();
    assert!(matches!(err, AccountError::AlreadyVerified));
}

#[tokio::test]
async fn verify_with_wrong_code_changes_nothing() {
    let (store, service, _mailer) = setup().await;

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;

    let mut uow = store.begin().await.unwrap();
    let err = service.verify(&mut uow, &ctx, "not-the-code").await.unwrap_err();
    assert!(matches!(err, AccountError::WrongVerificationCode));
    uow.rollback().await.unwrap();

    let stored = reload(&store, account.id).await;
    assert!(stored.is_unverified());
    assert!(stored.verification_code.is_some());
}

#[tokio::test]
async fn verify_requires_a_session() {
    let (store, service, _mailer) = setup().await;
    signup(&store, &service, "a@x.com", "A").await;

    let anonymous = AuthContext::anonymous();
    let mut uow = store.begin().await.unwrap();
    let err = service.verify(&mut uow, &anonymous, "whatever").await.unwrap_err();
    assert!(matches!(err, AccountError::NotAuthenticated));
}

#[tokio::test]
async fn resend_verification_reuses_the_stored_code() {
    let (store, service, mailer) = setup().await;

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;
    let code = reload(&store, account.id).await.verification_code.unwrap();

    let mut uow = store.begin().await.unwrap();
    service
        .resend_verification_mail(&mut uow, &ctx, account.id)
        .await
        .unwrap();
    uow.commit().await.unwrap();

    // Same code in both mails, and the stored one is unchanged.
    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].body, sent[1].body);
    assert_eq!(reload(&store, account.id).await.verification_code, Some(code));

    // A stranger may not trigger the resend.
    let (_, stranger) = signup(&store, &service, "b@x.com", "B").await;
    let mut uow = store.begin().await.unwrap();
    let err = service
        .resend_verification_mail(&mut uow, &stranger, account.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::NotPermitted));
    uow.rollback().await.unwrap();

    // Once verified there is nothing to resend.
    let code = reload(&store, account.id).await.verification_code.unwrap();
    let mut uow = store.begin().await.unwrap();
    service.verify(&mut uow, &ctx, &code).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let err = service
        .resend_verification_mail(&mut uow, &ctx, account.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::AlreadyVerified));
}

#[tokio::test]
async fn resend_verification_for_missing_account_fails() {
    let (store, service, _mailer) = setup().await;
    let (_, ctx) = signup(&store, &service, "a@x.com", "A").await;

    let mut uow = store.begin().await.unwrap();
    let err = service
        .resend_verification_mail(&mut uow, &ctx, 9999)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::UserNotFound));
}

#[tokio::test]
async fn reset_codes_are_single_use() {
    let (store, service, mailer) = setup().await;

    let (account, _ctx) = signup(&store, &service, "a@x.com", "A").await;
    let old_hash = reload(&store, account.id).await.password_hash;

    let mut uow = store.begin().await.unwrap();
    service.forgot_password(&mut uow, "a@x.com").await.unwrap();
    uow.commit().await.unwrap();

    let code = reload(&store, account.id)
        .await
        .reset_password_code
        .expect("missing reset code");

    let reset_mail = mailer.sent().last().cloned().unwrap();
    assert!(reset_mail.body.contains(&format!("{APP_URL}/reset-password/{code}")));

    // Consume the code.
    let mut uow = store.begin().await.unwrap();
    service
        .reset_password(&mut uow, &code, "correct horse")
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let stored = reload(&store, account.id).await;
    assert_eq!(stored.reset_password_code, None);
    assert_ne!(stored.password_hash, old_hash);
    assert!(verify_password("correct horse", &stored.password_hash).unwrap());

    // The consumed code can never satisfy another reset.
    let mut uow = store.begin().await.unwrap();
    let err = service
        .reset_password(&mut uow, &code, "another pass")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::WrongResetPasswordCode));
}

#[tokio::test]
async fn forgot_password_for_unknown_email_is_a_silent_noop() {
    let (store, service, mailer) = setup().await;

    let mut uow = store.begin().await.unwrap();
    service
        .forgot_password(&mut uow, "ghost@x.com")
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn fetch_redacts_email_for_third_parties() {
    let (store, service, _mailer) = setup().await;
    bootstrap(&store, &service).await;

    let (target, owner_ctx) = signup(&store, &service, "a@x.com", "A").await;
    let (_, stranger_ctx) = signup(&store, &service, "b@x.com", "B").await;

    // Stranger: not editable, email redacted.
    let mut uow = store.begin().await.unwrap();
    let view = service
        .fetch_by_id(&mut uow, &stranger_ctx, target.id)
        .await
        .unwrap();
    assert!(!view.editable);
    assert_eq!(view.email, "Confidential");

    // Owner sees their own address.
    let mut uow = store.begin().await.unwrap();
    let view = service
        .fetch_by_id(&mut uow, &owner_ctx, target.id)
        .await
        .unwrap();
    assert!(view.editable);
    assert_eq!(view.email, "a@x.com");

    // So does an admin.
    let admin = store
        .accounts()
        .find_by_email(&AdminConfig::default().email)
        .await
        .unwrap()
        .unwrap();
    let admin_ctx = AuthContext::authenticated(admin);
    let mut uow = store.begin().await.unwrap();
    let view = service
        .fetch_by_id(&mut uow, &admin_ctx, target.id)
        .await
        .unwrap();
    assert!(view.editable);
    assert_eq!(view.email, "a@x.com");

    // Anonymous viewers get the redacted form too.
    let mut uow = store.begin().await.unwrap();
    let view = service
        .fetch_by_id(&mut uow, &AuthContext::anonymous(), target.id)
        .await
        .unwrap();
    assert!(!view.editable);
    assert_eq!(view.email, "Confidential");
}

#[tokio::test]
async fn non_admins_cannot_change_their_own_roles() {
    let (store, service, _mailer) = setup().await;

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;

    let mut uow = store.begin().await.unwrap();
    service
        .update(
            &mut uow,
            &ctx,
            account.id,
            UpdateCommand {
                name: "A renamed".to_string(),
                roles: Some(RoleSet::of(&[Role::Admin])),
            },
        )
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let stored = reload(&store, account.id).await;
    assert_eq!(stored.name, "A renamed");
    // The smuggled role change was dropped.
    assert_eq!(stored.roles, RoleSet::of(&[Role::Unverified]));

    // Session refreshed with the new name after the self-edit.
    assert_eq!(ctx.current().await.unwrap().name, "A renamed");
}

#[tokio::test]
async fn admins_can_change_roles_on_other_accounts() {
    let (store, service, _mailer) = setup().await;
    bootstrap(&store, &service).await;

    let (account, _ctx) = signup(&store, &service, "a@x.com", "A").await;

    let admin = store
        .accounts()
        .find_by_email(&AdminConfig::default().email)
        .await
        .unwrap()
        .unwrap();
    let admin_ctx = AuthContext::authenticated(admin);

    let mut uow = store.begin().await.unwrap();
    service
        .update(
            &mut uow,
            &admin_ctx,
            account.id,
            UpdateCommand {
                name: "Promoted".to_string(),
                roles: Some(RoleSet::of(&[Role::User])),
            },
        )
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let stored = reload(&store, account.id).await;
    assert_eq!(stored.name, "Promoted");
    assert_eq!(stored.roles, RoleSet::of(&[Role::User]));
    // Unverified was dropped, so the code is gone with it.
    assert_eq!(stored.verification_code, None);
}

#[tokio::test]
async fn admin_adding_unverified_mints_a_fresh_code() {
    let (store, service, _mailer) = setup().await;
    bootstrap(&store, &service).await;

    // A fully verified account: no role, no code left.
    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;
    let code = reload(&store, account.id).await.verification_code.unwrap();
    let mut uow = store.begin().await.unwrap();
    service.verify(&mut uow, &ctx, &code).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(reload(&store, account.id).await.verification_code, None);

    let admin = store
        .accounts()
        .find_by_email(&AdminConfig::default().email)
        .await
        .unwrap()
        .unwrap();
    let admin_ctx = AuthContext::authenticated(admin);

    let mut uow = store.begin().await.unwrap();
    service
        .update(
            &mut uow,
            &admin_ctx,
            account.id,
            UpdateCommand {
                name: "Demoted".to_string(),
                roles: Some(RoleSet::of(&[Role::User, Role::Unverified])),
            },
        )
        .await
        .unwrap();
    uow.commit().await.unwrap();

    // Re-adding Unverified without a stored code mints a fresh one, keeping
    // the unverified-iff-code invariant.
    let stored = reload(&store, account.id).await;
    assert!(stored.is_unverified());
    let fresh = stored.verification_code.expect("no code minted");
    assert!(!fresh.is_empty());
    assert_ne!(fresh, code);
}

#[tokio::test]
async fn update_by_a_stranger_is_not_permitted() {
    let (store, service, _mailer) = setup().await;

    let (target, _) = signup(&store, &service, "a@x.com", "A").await;
    let (_, stranger_ctx) = signup(&store, &service, "b@x.com", "B").await;

    let mut uow = store.begin().await.unwrap();
    let err = service
        .update(
            &mut uow,
            &stranger_ctx,
            target.id,
            UpdateCommand {
                name: "Hijacked".to_string(),
                roles: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::NotPermitted));
}

#[tokio::test]
async fn end_to_end_signup_verify_reverify() {
    let (store, service, _mailer) = setup().await;

    let (account, ctx) = signup(&store, &service, "a@x.com", "A").await;
    let stored = reload(&store, account.id).await;
    assert!(stored.is_unverified());
    let code = stored.verification_code.unwrap();

    let mut uow = store.begin().await.unwrap();
    service.verify(&mut uow, &ctx, &code).await.unwrap();
    uow.commit().await.unwrap();

    let stored = reload(&store, account.id).await;
    assert!(!stored.is_unverified());
    assert_eq!(stored.verification_code, None);

    let mut uow = store.begin().await.unwrap();
    let err = service.verify(&mut uow, &ctx, &code).await.unwrap_err();
    assert!(matches!(err, AccountError::AlreadyVerified));
}

use super::CrudController;
use crate::repository::{RepoContext, UsersRepository};
use crate::resource::UserResource;

/// Admin CRUD over users.
#[derive(Clone, Copy, Debug, Default)]
pub struct UsersController;

impl CrudController for UsersController {
    type Repo = UsersRepository;
    type Res = UserResource;

    fn repository(&self, ctx: RepoContext) -> UsersRepository {
        UsersRepository::new(ctx)
    }

    fn formatter(&self) -> UserResource {
        UserResource
    }
}

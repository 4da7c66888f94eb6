pub const REZ: &str = "\
klauncher rez: build and run `rez env` commands for the pipeline.

Options:
  -c, --config <SET>       config set the saved environments belong to
  -p, --package <PKG>      primary package (saved in the session context)
  -a, --add <PKG>...       additional packages
      --path <DIR>         working folder (saved in the session context)
      --load <NAME>        load a saved environment (`-i <rxt>`)
  -s, --save <NAME>        save the resolved environment (`-o <rxt>`)
  -g, --grab <PKG>...      copy packages from PROD to LOCAL, then use LOCAL
  -w, --switch <PKG>...    use the LOCAL version of packages
  -l, --launch <APP>       launch a DCC application inside the environment
  -r, --release <N-V>      LOCAL package to release, as name-version
      --prod-release <N-V> PROD name-version to release it as
  -e, --echo               log the current settings
      --context            show the session context
      --dry-run            print the command instead of running it

Examples:
  klauncher rez -c dev -p lookdev -l maya
  klauncher rez -c dev -p lookdev -s lookdev
  klauncher rez -c dev --load lookdev -l maya
  klauncher rez -w lookdev shaders -l houdini
  klauncher rez -r iter-1.1.0 --prod-release iter-1.2.0

Saved environments are recorded as config set -> package -> .rxt path.
";

pub const GIT: &str = "\
klauncher git: git operations on package checkouts under <path>/<package>.

Options:
  -p, --package <PKG>     package (repository) name
      --path <DIR>        folder holding the checkouts
  -b, --branch <BRANCH>   branch for checkout and branch creation
  -m, --msg <MESSAGE>     commit message
      --git-url <URL>     clone this URL instead of the registered one
  -t, --git-tag <TAG>     tag the repository
      --clone             clone the package repository
      --fetch             fetch from the remote
      --pull              pull from the remote
      --checkout          check out --branch, creating it when missing
      --stash             stash uncommitted changes before checkout
      --commit            commit tracked changes (needs --msg)
      --all               stage new files too when committing
      --push              push the current branch after committing
      --create-branch     create and check out --branch
      --list-branches     list remote branches
      --log [N]           show the last N commits (default 5)
      --history           show the full history and tags
      --context           show the session context

Package, branch, path and URL are remembered per terminal session, so
follow-up commands can omit them:
  klauncher git -p lookdev --clone
  klauncher git -b feature/shaders --checkout --stash
  klauncher git -m \"fix shader paths\" --commit --push
";

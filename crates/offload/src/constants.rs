// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub(crate) const ERR_POISONED_LOCK: &str =
    "encountered a poisoned lock - cannot continue because a thread panicked while holding it";

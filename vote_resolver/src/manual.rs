/*!

This is the long-form manual for `vote_resolver` and the `vetting` command.

## Contests

A contest is one base item in one locale. Its candidates are every value
recorded for the item, whether or not anybody voted for it, plus the baseline
value on record before the current round. Two item ids with the same value
and annotation are the same candidate.

Each voter has one ballot per contest: the latest one counts. A ballot may
be an explicit abstention. Ballots from unknown voters or naming an unknown
item are dropped, and so are two ballots of the same voter with the same
timestamp and different choices. Dropped ballots are reported as an error
on the contest.

## Organizational votes

Every voter belongs to an organization, and an organization votes once. For
each candidate, the organization's seniority is the most senior tier among
its voters who chose it. The candidate with the most senior seniority gets
the organization's vote, with the weight of that tier:

| tier     | weight |
|----------|--------|
| `admin`  | 64     |
| `tc`     | 64     |
| `expert` | 8      |
| `vetter` | 4      |
| `street` | 1      |
| `locked` | none   |

If several candidates share the most senior tier, the organization is in
dispute: it casts no vote, and the dispute is stored with the outcome.
Inactive voters count as `locked`.

An organization that did not vote may have a default choice, with its own
weight. A default of weight 1 is ignored when another candidate already has
votes.

## Resolution

Every candidate with a value is checked by the validator. Under the
`advisory` mode (the default) a failing candidate keeps its score and is only
flagged: if it wins, it is stored under the `proposed-x555` tag. Under the
`strict` mode it is removed from the tally, and organizations that chose it
fall back on their next choice.

With `O` the best score and `N` the best score among the other candidates
(equal to `O` on a tie):

- `O >= 2N` and `O >= 8`: **approved**
- `O >= 2N`, `O >= 2` and at least 2 organizations behind the winner: **contributed**
- `O > N` and `O >= 2`: **provisional**
- any other winner: **unconfirmed**

Equal scores are ordered by value, then by annotation (a value without
annotation first), then by item id. Values are compared by their letters
ignoring case and accents, then by accents, then by case with lower case
first, so that "école" < "fable" and "apple" < "Apple". With the `codepoint`
tie-break they are compared by code point.

An approved baseline stays approved unless the vote approves another value.
When nobody has a score, the baseline keeps its recorded status.

## Results

Each outcome carries result flags, shown as letters:

| letter | flag           | meaning                                              |
|--------|----------------|------------------------------------------------------|
| `0`    | `no_votes`     | no winner and no ballot                              |
| `I`    | `insufficient` | ballots but no winner                                |
| `X`    | `error`        | a disqualified winner (strict), a dropped ballot or a value with conflicting annotations |
| `D`    | `disputed`     | a tie decided by the tie-break, below approved       |
| `A`    | `admin`        | an admin vote supports the winner                    |
| `T`    | `tc`           | a tc vote supports the winner                        |
| `G`    | `good`         | a clean winner                                       |
| `U`    | `unanimous`    | nothing else has a score                             |
| `N`    | `no_change`    | the baseline was kept without any ballot             |
| `R`    | `removal`      | the winning value is empty                           |

A locale's status is the union of the flags of its contests.

Losing candidates that have voters are stored as alternates, numbered in item
order from `proposed-x1000`.

## Configuration

The `vetting` command reads a JSON file:

```text
{
  "rules": { "disqualifyMode": "advisory", "tiebreakMode": "root", "workers": 2 },
  "voters": [ { "id": 1, "organization": "Apple", "tier": "vetter" } ],
  "contests": [
    {
      "locale": "fr",
      "baseItem": 100,
      "baseline": { "item": 100, "value": "Bonjour", "status": "approved" },
      "candidates": [ { "item": 101, "value": "Salut" } ],
      "ballots": [ { "voter": 1, "item": 101, "timestamp": "2023-05-01T10:00:00Z" } ],
      "defaults": [ { "organization": "Google", "item": 101, "weight": 4 } ]
    }
  ],
  "invalidValues": [ { "locale": "fr", "value": "???" } ],
  "ballotFiles": [ { "filePath": "ballots.csv" } ]
}
```

Extra ballots can be given in CSV files, with the columns `locale`, `voter`,
`baseItem`, `candidateItem` and `timestamp` (RFC 3339). An empty candidate or
`-1` is an abstention:

```text
locale,voter,baseItem,candidateItem,timestamp
fr,1,100,101,2023-05-01T10:00:00Z
fr,2,100,,2023-05-01T10:05:00Z
```

The rules also accept `approvedThreshold`, `minimumThreshold`,
`contributedOrganizations` and `alternateBase`, which default to 8, 2, 2 and
1000. Omitted rules are the defaults of
[`ResolverRules::DEFAULT_RULES`](crate::ResolverRules::DEFAULT_RULES).

## Summary

After resolving, `vetting` prints one entry per locale with the locale
status (letters as above), the number of contests with each bad result, and
for every contest the winner, its status, the result letters, the
alternates, the disputing organizations and the values proposed under
conflicting annotations. Contests that failed are listed with their error,
and a locale that could not be read at all only carries its error. Pass `--reference` with a previous summary to check that
nothing changed.

 */
